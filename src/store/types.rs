//! Backing store types
//!
//! Documents, revisions and content-addressed attachment metadata.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};

use super::errors::StoreError;

/// Prefix identifying the hash algorithm behind a digest
const DIGEST_PREFIX: &str = "sha1-";

/// Content identity of a stored blob
///
/// Identical bytes always produce the same digest. The encoding is
/// URL-safe base64 so a digest can double as a file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Compute the digest of a byte payload
    pub fn of(data: &[u8]) -> Self {
        let hash = Sha1::digest(data);
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash);
        Digest(format!("{}{}", DIGEST_PREFIX, encoded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Digest {
    fn from(value: &str) -> Self {
        Digest(value.to_string())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document revision used for optimistic concurrency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// Revision assigned to a freshly created document
    pub fn first() -> Self {
        Revision(1)
    }

    /// Revision following this one
    pub fn next(self) -> Self {
        Revision(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of writing a blob through the attachment API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub digest: Digest,
    pub length: u64,
}

/// Attachment metadata stored inline in its owning document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentStub {
    /// Digest of the blob content
    pub digest: Digest,
    /// Blob size in bytes
    pub length: u64,
    /// MIME type supplied when the blob was written
    pub content_type: String,
}

/// A stored document: a JSON body plus named attachment stubs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document identifier
    pub id: String,
    /// Revision the caller last observed (None for a new document)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    /// Attachment stubs by attachment name
    #[serde(default)]
    pub attachments: BTreeMap<String, AttachmentStub>,
    /// Free-form JSON body
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Document {
    /// Create an empty, not yet stored document
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            attachments: BTreeMap::new(),
            body: serde_json::Value::Null,
        }
    }

    /// Create a document with a body and no attachments
    pub fn with_body(id: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            body,
            ..Self::new(id)
        }
    }
}

/// Per-document outcome of a bulk write
pub type WriteOutcome = Result<Revision, StoreError>;
