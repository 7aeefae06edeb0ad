//! Repository and store error types.

use thiserror::Error;

use crate::context::ContextError;
use crate::resource::ObjectKey;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    /// Stale revision or an object that already exists.
    #[error("Conflict on {kind} '{key}': {message}")]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        message: String,
    },

    #[error("Invalid object: {0}")]
    Invalid(String),

    #[error("Invalid skip token: {0}")]
    InvalidSkipToken(String),

    #[error("Failed to set up watch: {0}")]
    WatchSetup(String),

    #[error("Watch closed before the condition was met")]
    WatchClosed,

    #[error("Timed out waiting for condition")]
    ConditionTimeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    pub fn not_found(kind: &'static str, key: ObjectKey) -> Self {
        RepositoryError::NotFound { kind, key }
    }

    pub fn conflict(kind: &'static str, key: ObjectKey, message: impl Into<String>) -> Self {
        RepositoryError::Conflict {
            kind,
            key,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Conflict { .. })
    }

    /// Whether reloading and retrying can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepositoryError::Conflict { .. } | RepositoryError::Unavailable(_)
        )
    }
}

impl From<ContextError> for RepositoryError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => RepositoryError::Cancelled,
            ContextError::DeadlineExceeded => RepositoryError::DeadlineExceeded,
        }
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;
