//! Backing Store Error Types
//!
//! Structured errors for document and attachment operations.
//! Optimistic-concurrency rejections are kept distinct from transport failures.

use super::types::Digest;

/// Backing store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Document update conflict: {0}")]
    Conflict(String),

    #[error("Attachment references missing blob {0}")]
    MissingBlob(Digest),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed document: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this error means the requested record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether this error is an optimistic-concurrency rejection
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Build a conflict error for a stale revision
    pub fn stale_revision(id: &str) -> Self {
        StoreError::Conflict(format!("document '{}' has a newer revision", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(StoreError::NotFound("x".into()).is_not_found());
        assert!(!StoreError::NotFound("x".into()).is_conflict());
        assert!(StoreError::stale_revision("lru__").is_conflict());
    }

    #[test]
    fn test_display() {
        let err = StoreError::stale_revision("lru__");
        assert_eq!(
            err.to_string(),
            "Document update conflict: document 'lru__' has a newer revision"
        );
    }
}
