//! Backing store contract
//!
//! The cache consumes its durable storage only through this trait.

use async_trait::async_trait;
use bytes::Bytes;

use super::errors::StoreError;
use super::types::{AttachmentDescriptor, Document, Revision, WriteOutcome};

/// Durable document store with content-addressed attachments
///
/// Writes are guarded by optimistic concurrency: a write carrying a revision
/// other than the document's current one is rejected with
/// [`StoreError::Conflict`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the current revision of a document
    async fn get(&self, id: &str) -> Result<Document, StoreError>;

    /// Create or update a document, returning its new revision
    async fn put(&self, doc: Document) -> Result<Revision, StoreError>;

    /// Write several documents independently
    ///
    /// Returns one outcome per input document, in input order. A failure of
    /// one document does not prevent the others from being written.
    async fn bulk_write(&self, docs: Vec<Document>) -> Vec<WriteOutcome>;

    /// Store a blob as a named attachment of `owner_id`
    ///
    /// `known_rev` must match the owner's current revision (None creates it).
    async fn put_attachment(
        &self,
        owner_id: &str,
        name: &str,
        known_rev: Option<Revision>,
        blob: Bytes,
        content_type: &str,
    ) -> Result<AttachmentDescriptor, StoreError>;

    /// Fetch the blob behind a named attachment
    async fn get_attachment(&self, owner_id: &str, name: &str) -> Result<Bytes, StoreError>;

    /// Reclaim blobs that no current document references
    async fn compact(&self) -> Result<(), StoreError>;
}

/// Validate a claimed revision against the stored one and pick the next
///
/// Shared by the store implementations so they agree on conflict rules.
pub(crate) fn next_revision(
    id: &str,
    current: Option<Revision>,
    claimed: Option<Revision>,
) -> Result<Revision, StoreError> {
    match (current, claimed) {
        (None, None) => Ok(Revision::first()),
        (Some(current), Some(claimed)) if current == claimed => Ok(current.next()),
        (None, Some(_)) => Err(StoreError::Conflict(format!(
            "document '{}' does not exist",
            id
        ))),
        _ => Err(StoreError::stale_revision(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_revision_rules() {
        let first = Revision::first();

        assert_eq!(next_revision("d", None, None).unwrap(), first);
        assert_eq!(next_revision("d", Some(first), Some(first)).unwrap(), first.next());

        // Creating over an existing document
        assert!(next_revision("d", Some(first), None).unwrap_err().is_conflict());
        // Stale revision
        assert!(next_revision("d", Some(first.next()), Some(first))
            .unwrap_err()
            .is_conflict());
        // Updating a document that is gone
        assert!(next_revision("d", None, Some(first)).unwrap_err().is_conflict());
    }
}
