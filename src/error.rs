//! Error types for the tether synchronization engine.

use crate::types::TaskId;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Corrupt store entry: {0}")]
    Corrupt(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Synchronization and remote delivery errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    #[error("Transient delivery failure: {0}")]
    Transient(String),

    #[error("Mutation rejected by server: {0}")]
    Rejected(String),

    #[error("Invalid response body: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Whether a failed delivery should stay queued for another attempt.
    ///
    /// A rejected mutation (the server understood the request and refused
    /// it) cannot succeed on replay and is abandoned immediately; everything
    /// transport-shaped is a retry candidate.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Unreachable(_) | SyncError::Transient(_) | SyncError::InvalidResponse(_) => {
                true
            }
            SyncError::Rejected(_) | SyncError::ConfigError(_) | SyncError::Storage(_) => false,
        }
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_mutations_are_not_retryable() {
        assert!(!SyncError::Rejected("404".to_string()).is_retryable());
        assert!(SyncError::Transient("503".to_string()).is_retryable());
        assert!(SyncError::Unreachable("connection refused".to_string()).is_retryable());
    }
}
