use crate::model::LockKey;

/// Mutation attempted on a (date, batch) pair that was already submitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("attendance for {key} is locked")]
pub struct LockedError {
    pub key: LockKey,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Roster fetch, attendance pull/push or proof upload failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("{0}")]
    Remote(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("storage failed: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("state encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Locked(#[from] LockedError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

impl CoreError {
    /// Stable code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Locked(_) => "locked",
            CoreError::Validation(_) => "validation",
            CoreError::Transport(_) => "transport",
            CoreError::Persistence(_) => "persistence",
        }
    }
}
