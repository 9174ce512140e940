//! Attachment directory and access ledger
//!
//! Both records live in the backing store as ordinary documents. The
//! directory owns the attachments (key -> content descriptor); the ledger
//! holds last-access timestamps per digest in a separate document so its
//! churn does not pile revisions onto the directory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::store::{AttachmentStub, Digest, Document, DocumentStore, Revision, StoreError};

/// Document id of the attachment directory
pub const DIRECTORY_DOC_ID: &str = "lru__";

/// Document id of the access ledger
pub const LEDGER_DOC_ID: &str = "lru__last_used";

/// Namespace a caller key so it can never collide with reserved names
pub fn encode_key(key: &str) -> String {
    format!("${}", key)
}

/// Reverse of [`encode_key`]
pub fn decode_key(name: &str) -> &str {
    name.strip_prefix('$').unwrap_or(name)
}

/// Load a document, creating it from `default` when it does not exist yet
async fn load_or_create(
    store: &dyn DocumentStore,
    id: &str,
    default: impl FnOnce() -> Document,
) -> Result<Document> {
    match store.get(id).await {
        Ok(doc) => Ok(doc),
        Err(e) if e.is_not_found() => {
            match store.put(default()).await {
                Ok(rev) => debug!(id = id, rev = %rev, "Created default record"),
                // Someone else materialized it first; theirs is just as empty
                Err(e) if e.is_conflict() => debug!(id = id, "Default record created concurrently"),
                Err(e) => return Err(e.into()),
            }
            Ok(store.get(id).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Snapshot of the key -> descriptor mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentDirectory {
    rev: Option<Revision>,
    /// Descriptors by encoded key
    entries: BTreeMap<String, AttachmentStub>,
}

impl AttachmentDirectory {
    /// Load the current directory, materializing an empty one on first use
    pub async fn load(store: &dyn DocumentStore) -> Result<Self> {
        let doc = load_or_create(store, DIRECTORY_DOC_ID, || Document::new(DIRECTORY_DOC_ID)).await?;
        Ok(Self {
            rev: doc.rev,
            entries: doc.attachments,
        })
    }

    pub fn revision(&self) -> Option<Revision> {
        self.rev
    }

    pub fn get(&self, key: &str) -> Option<&AttachmentStub> {
        self.entries.get(&encode_key(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&encode_key(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<AttachmentStub> {
        self.entries.remove(&encode_key(key))
    }

    /// Drop every key whose descriptor references `digest`
    ///
    /// Returns the (decoded) keys that were removed.
    pub fn remove_digest(&mut self, digest: &Digest) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|name, stub| {
            if &stub.digest == digest {
                removed.push(decode_key(name).to_string());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Live entries by caller key
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttachmentStub)> {
        self.entries.iter().map(|(name, stub)| (decode_key(name), stub))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of each distinct digest referenced by a live entry
    ///
    /// Aliased keys share their digest's length; it is counted once.
    pub fn distinct_lengths(&self) -> BTreeMap<&Digest, u64> {
        self.entries
            .values()
            .map(|stub| (&stub.digest, stub.length))
            .collect()
    }

    /// Document to write back, carrying the revision this snapshot was read at
    pub fn to_document(&self) -> Document {
        Document {
            id: DIRECTORY_DOC_ID.to_string(),
            rev: self.rev,
            attachments: self.entries.clone(),
            body: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerBody {
    #[serde(default)]
    last_used: BTreeMap<Digest, u64>,
}

/// Snapshot of the digest -> last-access mapping
///
/// Entries are never removed when content leaves the directory; stale
/// entries are what `info()` counts as evicted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessLedger {
    rev: Option<Revision>,
    last_used: BTreeMap<Digest, u64>,
}

impl AccessLedger {
    /// Load the current ledger, materializing an empty one on first use
    pub async fn load(store: &dyn DocumentStore) -> Result<Self> {
        let doc = load_or_create(store, LEDGER_DOC_ID, || {
            Document::with_body(LEDGER_DOC_ID, serde_json::json!({ "lastUsed": {} }))
        })
        .await?;

        let body: LedgerBody = if doc.body.is_null() {
            LedgerBody::default()
        } else {
            serde_json::from_value(doc.body).map_err(StoreError::from)?
        };

        Ok(Self {
            rev: doc.rev,
            last_used: body.last_used,
        })
    }

    pub fn revision(&self) -> Option<Revision> {
        self.rev
    }

    /// Last access time of a digest, in milliseconds since the epoch
    pub fn last_used(&self, digest: &Digest) -> Option<u64> {
        self.last_used.get(digest).copied()
    }

    /// Timestamp for a new access, later than any access already recorded
    ///
    /// The ledger is shared by every handle over the store, so ordering is
    /// anchored to it rather than to a single process's clock.
    pub fn next_timestamp(&self, now: u64) -> u64 {
        self.last_used
            .values()
            .max()
            .map_or(now, |&latest| now.max(latest + 1))
    }

    /// Record an access
    pub fn touch(&mut self, digest: &Digest, timestamp: u64) {
        self.last_used.insert(digest.clone(), timestamp);
    }

    /// Every digest the ledger has ever seen
    pub fn digests(&self) -> impl Iterator<Item = &Digest> {
        self.last_used.keys()
    }

    pub fn to_document(&self) -> Result<Document> {
        let body = LedgerBody {
            last_used: self.last_used.clone(),
        };
        let mut doc = Document::with_body(
            LEDGER_DOC_ID,
            serde_json::to_value(body).map_err(StoreError::from)?,
        );
        doc.rev = self.rev;
        Ok(doc)
    }
}
