use thiserror::Error;

use crate::event::EventError;

use super::signal::SignalError;

/// Downlink transport failures
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("ping timed out")]
    PingTimeout,
}

/// Errors raised while serving a peer
#[derive(Debug, Error)]
pub enum PeerError {
    /// The client sent a well-formed but unacceptable message
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl PeerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PeerError::Validation(msg.into())
    }

    /// Whether the receive loop should log and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PeerError::Validation(_) | PeerError::UnknownMessage(_) | PeerError::Malformed(_)
        )
    }
}
