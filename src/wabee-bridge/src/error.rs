use crate::host::ConnectionId;
use crate::protocol::ProtocolError;
use thiserror::Error;
use wabee_core::ValidationError;

/// Errors from session lifecycle and outbound operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid account: {0}")]
    InvalidAccount(#[from] ValidationError),
    #[error("failed to initialize protocol client: {0}")]
    Init(ProtocolError),
    #[error("failed to spawn protocol thread: {0}")]
    Spawn(std::io::Error),
    #[error("no session for connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("connection {0} is not connected")]
    NotConnected(ConnectionId),
    #[error("failed to send message: {0}")]
    Send(ProtocolError),
}

pub type SessionResult<T> = Result<T, SessionError>;
