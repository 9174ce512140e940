//! Cache error types
//!
//! Every public cache operation reports one of these. Backing store errors
//! are folded into the same taxonomy so callers never match on store types.

use crate::store::StoreError;

/// Errors returned by cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The backing store rejected a write made against a stale revision
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Io(#[source] StoreError),

    /// Metadata references content the store no longer holds
    #[error("Inconsistent cache state: {0}")]
    Inconsistent(String),

    /// Neither the directory nor the ledger could be persisted
    #[error("Commit failed (directory: {directory}; ledger: {ledger})")]
    CommitFailed {
        directory: Box<CacheError>,
        ledger: Box<CacheError>,
    },

    #[error("Mutation queue is closed")]
    SerializerClosed,
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CacheError::Conflict(_))
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => CacheError::NotFound(what),
            StoreError::Conflict(msg) => CacheError::Conflict(msg),
            StoreError::MissingBlob(digest) => {
                CacheError::Inconsistent(format!("blob {} is missing", digest))
            }
            other => CacheError::Io(other),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
