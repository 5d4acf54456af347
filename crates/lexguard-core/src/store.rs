//! Storage errors shared by the key and audit stores

use lexguard_common::SecurityError;

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient failure; the operation may be retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<StoreError> for SecurityError {
    fn from(e: StoreError) -> Self {
        let transient = e.is_transient();
        SecurityError::Storage {
            message: e.to_string(),
            transient,
        }
    }
}
