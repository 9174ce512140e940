//! LRU attachment cache
//!
//! Public operations over the directory, the ledger and the mutation queue.
//! `put`, `get` and `del` run through the queue; `peek`, `has` and `info`
//! read the store directly and may observe state a queued mutation is about
//! to replace.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures::future::{self, Either};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::eviction::EvictionPolicy;
use super::records::{encode_key, AccessLedger, AttachmentDirectory, DIRECTORY_DOC_ID};
use super::serializer::MutationSerializer;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::store::{Digest, DocumentStore, StoreError, WriteOutcome};

/// Per-key entry reported by [`LruCache::info`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInfo {
    pub length: u64,
    pub digest: Digest,
    /// Last access in milliseconds since the epoch, if the ledger has one
    pub last_used: Option<u64>,
}

/// Snapshot of cache contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    /// Live entries by caller key
    pub items: BTreeMap<String, ItemInfo>,
    /// Distinct digests among live entries
    pub num_unique_items: usize,
    /// Digests the ledger remembers that no live entry references
    pub num_evicted: usize,
    /// Sum of lengths over distinct live digests
    pub total_length: u64,
}

/// Hit/miss counters for `get`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Wall-clock milliseconds since the epoch
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Outcome of writing the directory and the ledger as two separate records
struct CommitOutcome {
    directory: Option<WriteOutcome>,
    ledger: Option<WriteOutcome>,
}

impl CommitOutcome {
    fn into_result(self) -> Result<()> {
        fn settle(outcome: Option<WriteOutcome>) -> Result<()> {
            match outcome {
                None | Some(Ok(_)) => Ok(()),
                Some(Err(e)) => Err(e.into()),
            }
        }

        let both = self.directory.is_some() && self.ledger.is_some();
        match (settle(self.directory), settle(self.ledger)) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => {
                if both {
                    warn!(error = %e, "Ledger committed but directory write failed");
                }
                Err(e)
            }
            (Ok(()), Err(e)) => {
                if both {
                    warn!(error = %e, "Directory committed but ledger write failed");
                }
                Err(e)
            }
            (Err(directory), Err(ledger)) => Err(CacheError::CommitFailed {
                directory: Box::new(directory),
                ledger: Box::new(ledger),
            }),
        }
    }
}

/// State shared between the handle and queued units
struct Shared {
    store: Arc<dyn DocumentStore>,
    policy: EvictionPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Shared {
    /// Persist whichever records changed, as independent writes
    async fn commit(
        &self,
        directory: Option<&AttachmentDirectory>,
        ledger: Option<&AccessLedger>,
    ) -> Result<()> {
        let mut docs = Vec::with_capacity(2);
        if let Some(directory) = directory {
            docs.push(directory.to_document());
        }
        if let Some(ledger) = ledger {
            docs.push(ledger.to_document()?);
        }
        if docs.is_empty() {
            return Ok(());
        }

        let mut outcomes = self.store.bulk_write(docs).await.into_iter();
        let mut next = || {
            outcomes.next().unwrap_or_else(|| {
                Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "store returned fewer write outcomes than documents",
                )))
            })
        };
        let outcome = CommitOutcome {
            directory: directory.map(|_| next()),
            ledger: ledger.map(|_| next()),
        };
        outcome.into_result()
    }

    async fn put(&self, key: String, blob: Bytes, content_type: String) -> Result<()> {
        let directory = AttachmentDirectory::load(self.store.as_ref()).await?;
        if directory.contains(&key) {
            // Keyed on presence only: new bytes under an existing key are not written
            debug!(key = %key, "Key already cached, skipping blob write");
        } else {
            let descriptor = self
                .store
                .put_attachment(
                    DIRECTORY_DOC_ID,
                    &encode_key(&key),
                    directory.revision(),
                    blob,
                    &content_type,
                )
                .await?;
            debug!(key = %key, digest = %descriptor.digest, length = descriptor.length, "Stored blob");
        }

        let mut directory = AttachmentDirectory::load(self.store.as_ref()).await?;
        let mut ledger = AccessLedger::load(self.store.as_ref()).await?;
        let digest = directory
            .get(&key)
            .map(|stub| stub.digest.clone())
            .ok_or_else(|| {
                CacheError::Inconsistent(format!("'{}' missing from directory after write", key))
            })?;
        let accessed_at = ledger.next_timestamp(now_millis());
        ledger.touch(&digest, accessed_at);

        let plan = self.policy.plan(&directory, &ledger);
        let evicted = !plan.is_empty();
        if evicted {
            let dropped = EvictionPolicy::apply(&plan, &mut directory);
            info!(
                keys = ?dropped,
                digests = plan.victims.len(),
                total_before = plan.total_before,
                total_after = plan.total_after,
                "Evicted least recently used content"
            );
        }

        self.commit(evicted.then_some(&directory), Some(&ledger))
            .await?;

        // Blobs no longer referenced by the directory are reclaimed here
        self.store.compact().await?;
        Ok(())
    }

    async fn get(&self, key: String) -> Result<Bytes> {
        let directory = AttachmentDirectory::load(self.store.as_ref()).await?;
        let mut ledger = AccessLedger::load(self.store.as_ref()).await?;

        let digest = match directory.get(&key) {
            Some(stub) if ledger.last_used(&stub.digest).is_some() => stub.digest.clone(),
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache MISS");
                return Err(CacheError::NotFound(key));
            }
        };

        let accessed_at = ledger.next_timestamp(now_millis());
        ledger.touch(&digest, accessed_at);
        if let Err(e) = self.commit(None, Some(&ledger)).await {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        match self
            .store
            .get_attachment(DIRECTORY_DOC_ID, &encode_key(&key))
            .await
        {
            Ok(blob) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, digest = %digest, "Cache HIT");
                Ok(blob)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, digest = %digest, error = %e, "Blob fetch failed after metadata hit");
                Err(e.into())
            }
        }
    }

    async fn del(&self, key: String) -> Result<()> {
        let mut directory = AttachmentDirectory::load(self.store.as_ref()).await?;
        if directory.remove(&key).is_none() {
            debug!(key = %key, "Delete of unknown key ignored");
            return Ok(());
        }

        self.commit(Some(&directory), None).await?;
        debug!(key = %key, "Deleted key");
        Ok(())
    }
}

/// Size-bounded, content-addressed LRU cache over a [`DocumentStore`]
///
/// Clones share the same state and mutation queue.
#[derive(Clone)]
pub struct LruCache {
    shared: Arc<Shared>,
    serializer: Arc<MutationSerializer>,
}

impl LruCache {
    /// Create a cache handle over `store`
    ///
    /// Must be called from within a Tokio runtime. The directory and ledger
    /// records are created lazily on first use.
    pub fn initialize(store: Arc<dyn DocumentStore>, config: CacheConfig) -> Result<Self> {
        let serializer = MutationSerializer::start()?;

        info!(max_size = ?config.limit(), "LRU cache initialized");

        Ok(Self {
            shared: Arc::new(Shared {
                store,
                policy: EvictionPolicy::new(&config),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
            serializer: Arc::new(serializer),
        })
    }

    /// Store `blob` under `key`, evicting least recently used content if the
    /// cache goes over budget
    ///
    /// Queued immediately; an empty content type fails without being queued.
    pub fn put(
        &self,
        key: &str,
        blob: impl Into<Bytes>,
        content_type: &str,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        if content_type.is_empty() {
            return Either::Left(future::ready(Err(CacheError::InvalidArgument(
                "need to specify a content-type".to_string(),
            ))));
        }

        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        let blob = blob.into();
        let content_type = content_type.to_string();
        Either::Right(
            self.serializer
                .submit("put", async move { shared.put(key, blob, content_type).await }),
        )
    }

    /// Fetch the blob stored under `key` and mark its content as used
    pub fn get(&self, key: &str) -> impl Future<Output = Result<Bytes>> + Send + 'static {
        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        self.serializer
            .submit("get", async move { shared.get(key).await })
    }

    /// Remove `key` from the cache; unknown keys are ignored
    pub fn del(&self, key: &str) -> impl Future<Output = Result<()>> + Send + 'static {
        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        self.serializer
            .submit("del", async move { shared.del(key).await })
    }

    /// Fetch the blob stored under `key` without touching its access time
    pub async fn peek(&self, key: &str) -> Result<Bytes> {
        Ok(self
            .shared
            .store
            .get_attachment(DIRECTORY_DOC_ID, &encode_key(key))
            .await?)
    }

    /// Whether the directory currently holds `key`
    pub async fn has(&self, key: &str) -> Result<bool> {
        let directory = AttachmentDirectory::load(self.shared.store.as_ref()).await?;
        Ok(directory.contains(key))
    }

    /// Describe the current contents
    pub async fn info(&self) -> Result<CacheInfo> {
        let directory = AttachmentDirectory::load(self.shared.store.as_ref()).await?;
        let ledger = AccessLedger::load(self.shared.store.as_ref()).await?;

        let items = directory
            .iter()
            .map(|(key, stub)| {
                (
                    key.to_string(),
                    ItemInfo {
                        length: stub.length,
                        digest: stub.digest.clone(),
                        last_used: ledger.last_used(&stub.digest),
                    },
                )
            })
            .collect();

        let live = directory.distinct_lengths();
        let num_evicted = ledger.digests().filter(|d| !live.contains_key(d)).count();

        Ok(CacheInfo {
            items,
            num_unique_items: live.len(),
            num_evicted,
            total_length: live.values().sum(),
        })
    }

    /// Hit/miss counters for `get`
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
        }
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let CacheStats { hits, misses } = self.stats();
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            "Cache metrics"
        );
    }
}
