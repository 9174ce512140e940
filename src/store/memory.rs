//! In-memory document store
//!
//! Keeps documents and blobs in process memory. Revisions and conflicts
//! behave exactly like the on-disk store, which makes it suitable for tests
//! and for caches that do not need to survive a restart.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::{next_revision, DocumentStore};
use super::errors::StoreError;
use super::types::{AttachmentDescriptor, AttachmentStub, Digest, Document, Revision, WriteOutcome};

#[derive(Default)]
struct State {
    docs: HashMap<String, Document>,
    blobs: HashMap<Digest, Bytes>,
}

impl State {
    fn write(&mut self, mut doc: Document) -> Result<Revision, StoreError> {
        let current = self.docs.get(&doc.id).and_then(|d| d.rev);
        let rev = next_revision(&doc.id, current, doc.rev)?;

        if let Some(stub) = doc
            .attachments
            .values()
            .find(|stub| !self.blobs.contains_key(&stub.digest))
        {
            return Err(StoreError::MissingBlob(stub.digest.clone()));
        }

        doc.rev = Some(rev);
        trace!(id = %doc.id, rev = %rev, "Stored document");
        self.docs.insert(doc.id.clone(), doc);
        Ok(rev)
    }
}

/// Document store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently held, referenced or not
    pub fn blob_count(&self) -> usize {
        self.state.lock().blobs.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Document, StoreError> {
        self.state
            .lock()
            .docs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn put(&self, doc: Document) -> Result<Revision, StoreError> {
        self.state.lock().write(doc)
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> Vec<WriteOutcome> {
        let mut state = self.state.lock();
        docs.into_iter().map(|doc| state.write(doc)).collect()
    }

    async fn put_attachment(
        &self,
        owner_id: &str,
        name: &str,
        known_rev: Option<Revision>,
        blob: Bytes,
        content_type: &str,
    ) -> Result<AttachmentDescriptor, StoreError> {
        let digest = Digest::of(&blob);
        let length = blob.len() as u64;

        let mut state = self.state.lock();
        let mut doc = state
            .docs
            .get(owner_id)
            .cloned()
            .unwrap_or_else(|| Document::new(owner_id));
        let rev = next_revision(owner_id, doc.rev, known_rev)?;

        state.blobs.entry(digest.clone()).or_insert(blob);
        doc.attachments.insert(
            name.to_string(),
            AttachmentStub {
                digest: digest.clone(),
                length,
                content_type: content_type.to_string(),
            },
        );
        doc.rev = Some(rev);
        state.docs.insert(owner_id.to_string(), doc);

        debug!(owner = owner_id, name = name, digest = %digest, length, "Stored attachment");
        Ok(AttachmentDescriptor { digest, length })
    }

    async fn get_attachment(&self, owner_id: &str, name: &str) -> Result<Bytes, StoreError> {
        let state = self.state.lock();
        let stub = state
            .docs
            .get(owner_id)
            .and_then(|doc| doc.attachments.get(name))
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", owner_id, name)))?;

        state
            .blobs
            .get(&stub.digest)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(stub.digest.to_string()))
    }

    async fn compact(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let live: HashSet<Digest> = state
            .docs
            .values()
            .flat_map(|doc| doc.attachments.values().map(|stub| stub.digest.clone()))
            .collect();

        let before = state.blobs.len();
        state.blobs.retain(|digest, _| live.contains(digest));
        debug!(removed = before - state.blobs.len(), "Compacted memory store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_document() {
        let store = MemoryStore::new();

        let rev = store.put(Document::new("a")).await.unwrap();
        let doc = store.get("a").await.unwrap();

        assert_eq!(doc.rev, Some(rev));
        assert!(store.get("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let store = MemoryStore::new();
        let rev = store.put(Document::new("a")).await.unwrap();

        let mut doc = store.get("a").await.unwrap();
        store.put(doc.clone()).await.unwrap();

        // Same revision again is now stale
        doc.rev = Some(rev);
        assert!(store.put(doc).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_attachments_are_deduplicated() {
        let store = MemoryStore::new();

        let first = store
            .put_attachment("owner", "a", None, Bytes::from_static(b"foo"), "text/plain")
            .await
            .unwrap();
        let rev = store.get("owner").await.unwrap().rev;
        let second = store
            .put_attachment("owner", "b", rev, Bytes::from_static(b"foo"), "text/plain")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.length, 3);
        assert_eq!(store.blob_count(), 1);
        assert_eq!(
            store.get_attachment("owner", "b").await.unwrap(),
            Bytes::from_static(b"foo")
        );
    }

    #[tokio::test]
    async fn test_put_attachment_with_stale_revision() {
        let store = MemoryStore::new();
        store
            .put_attachment("owner", "a", None, Bytes::from_static(b"foo"), "text/plain")
            .await
            .unwrap();

        let err = store
            .put_attachment("owner", "b", None, Bytes::from_static(b"bar"), "text/plain")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_compact_drops_unreferenced_blobs() {
        let store = MemoryStore::new();
        store
            .put_attachment("owner", "a", None, Bytes::from_static(b"foo"), "text/plain")
            .await
            .unwrap();

        let mut doc = store.get("owner").await.unwrap();
        doc.attachments.clear();
        store.put(doc).await.unwrap();
        assert_eq!(store.blob_count(), 1);

        store.compact().await.unwrap();
        assert_eq!(store.blob_count(), 0);
        assert!(store.get_attachment("owner", "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_blob_rejected() {
        let store = MemoryStore::new();
        let mut doc = Document::new("owner");
        doc.attachments.insert(
            "a".to_string(),
            AttachmentStub {
                digest: Digest::from("sha1-nope"),
                length: 1,
                content_type: "text/plain".to_string(),
            },
        );

        let err = store.put(doc).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingBlob(_)));
    }

    #[tokio::test]
    async fn test_bulk_write_reports_per_document() {
        let store = MemoryStore::new();
        store.put(Document::new("a")).await.unwrap();

        let outcomes = store
            .bulk_write(vec![Document::new("a"), Document::new("b")])
            .await;

        assert!(outcomes[0].as_ref().unwrap_err().is_conflict());
        assert!(outcomes[1].is_ok());
        assert!(store.get("b").await.is_ok());
    }
}
