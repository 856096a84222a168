//! Interface of the external messaging-protocol client library.
//!
//! The library owns the wire protocol (pairing, encryption, encoding). The
//! bridge only needs the blocking entry points below and a place to receive
//! its callbacks, which it invokes synchronously from inside [`ProtocolClient::run_loop`].

use std::sync::Arc;
use thiserror::Error;
use wabee_core::AccountConfig;

/// Failures reported by the protocol library.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("login failed: {0}")]
    Login(String),
    #[error("connection lost: {0}")]
    Connection(String),
    #[error("not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(String),
    #[error("{0}")]
    Other(String),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A contact as the protocol reports it. Every field may be missing on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeUser {
    pub jid: Option<String>,
    pub name: Option<String>,
    /// Name the contact chose for themselves ("push name").
    pub notify: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativePrivateMessage {
    pub from: Option<NativeUser>,
    pub text: Option<String>,
}

/// Callbacks the library invokes from its network thread.
pub trait ProtocolHandler: Send + Sync {
    fn on_private_message(&self, message: NativePrivateMessage);
    fn on_user_update(&self, user: NativeUser);
}

/// A connected (or connecting) protocol client.
///
/// `login` and `run_loop` block and are only ever called from the session's
/// protocol thread; `send_message` and `disconnect` are called from the main
/// context while `run_loop` is running.
pub trait ProtocolClient: Send + Sync {
    /// Blocks until the account is paired and authenticated.
    fn login(&self) -> ProtocolResult<()>;

    /// Blocks reading from the network, invoking the handler for each event.
    /// Returns when the connection closes.
    fn run_loop(&self) -> ProtocolResult<()>;

    fn send_message(&self, recipient: &str, text: &str) -> ProtocolResult<()>;

    /// Asks a running `login`/`run_loop` to return as soon as possible.
    fn disconnect(&self) {}
}

/// Builds clients with their callbacks registered up front.
pub trait ProtocolBackend: Send + Sync {
    fn init(
        &self,
        account: &AccountConfig,
        handler: Arc<dyn ProtocolHandler>,
    ) -> ProtocolResult<Arc<dyn ProtocolClient>>;
}
