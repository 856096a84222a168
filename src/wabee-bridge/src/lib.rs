//! Bridge between a threaded messaging-protocol client and a single-threaded
//! chat host.
//!
//! The protocol library runs login and its blocking read loop on a dedicated
//! thread per account. Its callbacks never touch host state: they are turned
//! into [`Envelope`]s and pushed onto a per-session queue. On the host's main
//! context, [`SessionController::poll`] periodically drains each queue and
//! applies the envelopes through the [`HostApplication`] interface.
//!
//! ```text
//!  protocol thread                         main context
//!  ───────────────                         ────────────
//!  login() ──► Connected ─┐
//!  run_loop()             │   EventQueue   ┌─► Dispatcher ──► HostApplication
//!    on_private_message ──┼──────────────► │     (every 50ms)
//!    on_user_update ──────┘                └─ SessionController::poll
//!  (returns) ──► Disconnected
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Instant;
//! use wabee_bridge::SessionController;
//! use wabee_core::{AccountConfig, BridgeConfig};
//!
//! let mut controller = SessionController::new(Arc::new(backend), BridgeConfig::default());
//! let connection = controller.login(&mut host, AccountConfig::new("alice"))?;
//!
//! // from the host's timer
//! let next = controller.poll(&mut host, Instant::now());
//! ```

mod adapter;
mod dispatcher;
mod envelope;
mod error;
mod host;
pub mod protocol;
mod queue;
mod session;
pub mod testing;

pub use adapter::{EnvelopeProducer, ProtocolAdapter, SessionWorker};
pub use dispatcher::{Dispatcher, LinkState, Rearm};
pub use envelope::{Envelope, EnvelopeKind, PrivateMessage, UserUpdate};
pub use error::{SessionError, SessionResult};
pub use host::{handles_match, BuddyStatus, ConnectionId, HostApplication, MessageFlags};
pub use protocol::{
    NativePrivateMessage, NativeUser, ProtocolBackend, ProtocolClient, ProtocolError,
    ProtocolHandler, ProtocolResult,
};
pub use queue::{event_queue, EventReceiver, EventSender};
pub use session::{Session, SessionController};
