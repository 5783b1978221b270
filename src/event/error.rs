use thiserror::Error;

/// Errors surfaced by the room event stream
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    /// The node, cursor or feed has been terminated. Callers resync from a fresh cursor.
    #[error("event stream closed")]
    Closed,

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The watcher is refusing new subscriptions during teardown.
    #[error("watcher is shutting down")]
    ShuttingDown,

    /// An invariant was violated.
    #[error("unexpected result: {0}")]
    Unexpected(String),

    /// The upstream change feed failed.
    #[error("feed error: {0}")]
    Feed(String),
}

impl EventError {
    /// Whether this error is part of normal stream lifecycle rather than a failure
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            EventError::Closed | EventError::Cancelled | EventError::ShuttingDown
        )
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        EventError::Unexpected(msg.into())
    }

    pub fn feed(msg: impl Into<String>) -> Self {
        EventError::Feed(msg.into())
    }
}
