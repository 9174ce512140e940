//! On-disk document store
//!
//! Documents are JSON files under `docs/`, blobs are files under `blobs/`
//! named by their digest. Every write goes through a temp file that is
//! atomically renamed into place, so readers never see a torn file.

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::backend::{next_revision, DocumentStore};
use super::errors::StoreError;
use super::types::{AttachmentDescriptor, AttachmentStub, Digest, Document, Revision, WriteOutcome};

const DOCS_DIR: &str = "docs";
const BLOBS_DIR: &str = "blobs";
const TEMP_SUFFIX: &str = ".tmp";

/// Document store persisted in a local directory
pub struct FsStore {
    /// Root directory of the store
    root: PathBuf,
    /// Serializes writers so revision checks and writes are not interleaved
    write_lock: Mutex<()>,
}

impl FsStore {
    /// Open (or create) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join(DOCS_DIR))?;
        std::fs::create_dir_all(root.join(BLOBS_DIR))?;

        let store = Self {
            root,
            write_lock: Mutex::new(()),
        };

        // Clean up any stale temp files from previous runs
        store.cleanup();

        info!(root = %store.root.display(), "Document store opened");
        Ok(store)
    }

    /// Remove temp files left behind by interrupted writes
    pub fn cleanup(&self) {
        for dir in [DOCS_DIR, BLOBS_DIR] {
            let Ok(read_dir) = std::fs::read_dir(self.root.join(dir)) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let path = entry.path();
                if is_temp_file(&path) {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
    }

    fn doc_path(&self, id: &str) -> PathBuf {
        // Document ids are arbitrary strings; encode them into a safe file name
        let name = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(id);
        self.root.join(DOCS_DIR).join(format!("{}.json", name))
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(BLOBS_DIR).join(digest.as_str())
    }

    async fn read_doc(&self, id: &str) -> Result<Option<Document>, StoreError> {
        match tokio::fs::read(self.doc_path(id)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a document; the caller must hold `write_lock`
    async fn write_doc_locked(&self, mut doc: Document) -> Result<Revision, StoreError> {
        let current = self.read_doc(&doc.id).await?.and_then(|d| d.rev);
        let rev = next_revision(&doc.id, current, doc.rev)?;

        for stub in doc.attachments.values() {
            if !tokio::fs::try_exists(self.blob_path(&stub.digest)).await? {
                return Err(StoreError::MissingBlob(stub.digest.clone()));
            }
        }

        doc.rev = Some(rev);
        let data = serde_json::to_vec(&doc)?;
        write_atomic(self.doc_path(&doc.id), data).await?;

        debug!(id = %doc.id, rev = %rev, "Stored document");
        Ok(rev)
    }
}

#[async_trait]
impl DocumentStore for FsStore {
    async fn get(&self, id: &str) -> Result<Document, StoreError> {
        self.read_doc(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn put(&self, doc: Document) -> Result<Revision, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_doc_locked(doc).await
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> Vec<WriteOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut outcomes = Vec::with_capacity(docs.len());
        for doc in docs {
            outcomes.push(self.write_doc_locked(doc).await);
        }
        outcomes
    }

    async fn put_attachment(
        &self,
        owner_id: &str,
        name: &str,
        known_rev: Option<Revision>,
        blob: Bytes,
        content_type: &str,
    ) -> Result<AttachmentDescriptor, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut doc = self
            .read_doc(owner_id)
            .await?
            .unwrap_or_else(|| Document::new(owner_id));
        // Fail fast before touching the blob directory
        next_revision(owner_id, doc.rev, known_rev)?;

        let digest = Digest::of(&blob);
        let length = blob.len() as u64;
        let blob_path = self.blob_path(&digest);
        if !tokio::fs::try_exists(&blob_path).await? {
            write_atomic(blob_path, blob.to_vec()).await?;
        }

        doc.attachments.insert(
            name.to_string(),
            AttachmentStub {
                digest: digest.clone(),
                length,
                content_type: content_type.to_string(),
            },
        );
        doc.rev = known_rev;
        self.write_doc_locked(doc).await?;

        debug!(owner = owner_id, name = name, digest = %digest, length, "Stored attachment");
        Ok(AttachmentDescriptor { digest, length })
    }

    async fn get_attachment(&self, owner_id: &str, name: &str) -> Result<Bytes, StoreError> {
        let doc = self.get(owner_id).await?;
        let stub = doc
            .attachments
            .get(name)
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", owner_id, name)))?;

        match tokio::fs::read(self.blob_path(&stub.digest)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(owner = owner_id, name = name, digest = %stub.digest, "Attachment blob missing");
                Err(StoreError::NotFound(stub.digest.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn compact(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut live = HashSet::new();
        let mut docs = tokio::fs::read_dir(self.root.join(DOCS_DIR)).await?;
        while let Some(entry) = docs.next_entry().await? {
            let path = entry.path();
            if is_temp_file(&path) {
                continue;
            }
            let doc: Document = serde_json::from_slice(&tokio::fs::read(&path).await?)?;
            live.extend(doc.attachments.into_values().map(|stub| stub.digest));
        }

        let mut removed = 0usize;
        let mut blobs = tokio::fs::read_dir(self.root.join(BLOBS_DIR)).await?;
        while let Some(entry) = blobs.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_temp_file(&path) || live.contains(&Digest::from(name)) {
                continue;
            }
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }

        debug!(removed, live = live.len(), "Compacted document store");
        Ok(())
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(TEMP_SUFFIX))
}

/// Write a file atomically using a temp file in the same directory
async fn write_atomic(path: PathBuf, data: Vec<u8>) -> io::Result<()> {
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let parent = path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(TEMP_SUFFIX)
            .tempfile_in(parent)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = FsStore::open(dir.path()).unwrap();
            store
                .put(Document::with_body("lru__", serde_json::json!({ "a": 1 })))
                .await
                .unwrap();
        }

        let store = FsStore::open(dir.path()).unwrap();
        let doc = store.get("lru__").await.unwrap();
        assert_eq!(doc.rev, Some(Revision::first()));
        assert_eq!(doc.body["a"], 1);
    }

    #[tokio::test]
    async fn test_conflict_on_stale_revision() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        store.put(Document::new("a")).await.unwrap();
        let err = store.put(Document::new("a")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_attachment_roundtrip_and_dedup() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        let first = store
            .put_attachment("owner", "$a", None, Bytes::from_static(b"foo"), "text/plain")
            .await
            .unwrap();
        let rev = store.get("owner").await.unwrap().rev;
        let second = store
            .put_attachment("owner", "$b", rev, Bytes::from_static(b"foo"), "text/plain")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            store.get_attachment("owner", "$a").await.unwrap(),
            Bytes::from_static(b"foo")
        );

        let blobs = std::fs::read_dir(dir.path().join(BLOBS_DIR)).unwrap().count();
        assert_eq!(blobs, 1);
    }

    #[tokio::test]
    async fn test_compact_removes_orphans() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        store
            .put_attachment("owner", "a", None, Bytes::from_static(b"foo"), "text/plain")
            .await
            .unwrap();
        let mut doc = store.get("owner").await.unwrap();
        doc.attachments.clear();
        store.put(doc).await.unwrap();

        store.compact().await.unwrap();

        let blobs = std::fs::read_dir(dir.path().join(BLOBS_DIR)).unwrap().count();
        assert_eq!(blobs, 0);
        assert!(store.get_attachment("owner", "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_blob_file_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        let descriptor = store
            .put_attachment("owner", "a", None, Bytes::from_static(b"foo"), "text/plain")
            .await
            .unwrap();
        std::fs::remove_file(store.blob_path(&descriptor.digest)).unwrap();

        let err = store.get_attachment("owner", "a").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cleanup_removes_stale_temp_files() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join(DOCS_DIR).join(".abc.tmp");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"partial").unwrap();

        let _store = FsStore::open(dir.path()).unwrap();
        assert!(!stale.exists());
    }
}
