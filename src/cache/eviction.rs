//! LRU eviction over distinct content
//!
//! Size is accounted per digest, not per key: keys that alias the same
//! content cost its length once, and are evicted together.

use tracing::debug;

use super::records::{AccessLedger, AttachmentDirectory};
use crate::config::CacheConfig;
use crate::store::Digest;

/// Which digests to drop so the directory fits its budget
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Digests to evict, least recently used first
    pub victims: Vec<Digest>,
    /// Distinct-content footprint before eviction
    pub total_before: u64,
    /// Distinct-content footprint once the victims are gone
    pub total_after: u64,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }
}

/// Size-budgeted least-recently-used policy
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    limit: Option<u64>,
}

impl EvictionPolicy {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            limit: config.limit(),
        }
    }

    /// Compute the victims for a directory/ledger snapshot
    ///
    /// Victims are taken in ascending order of last access. Digests with no
    /// ledger entry count as never used. Equal timestamps fall back to the
    /// digest's lexical order so the outcome is deterministic.
    pub fn plan(&self, directory: &AttachmentDirectory, ledger: &AccessLedger) -> EvictionPlan {
        let lengths = directory.distinct_lengths();
        let total: u64 = lengths.values().sum();

        let limit = match self.limit {
            Some(limit) if total > limit => limit,
            _ => {
                return EvictionPlan {
                    victims: Vec::new(),
                    total_before: total,
                    total_after: total,
                }
            }
        };

        let mut candidates: Vec<(u64, &Digest, u64)> = lengths
            .iter()
            .map(|(digest, length)| (ledger.last_used(digest).unwrap_or(0), *digest, *length))
            .collect();
        candidates.sort();

        let mut remaining = total;
        let mut victims = Vec::new();
        for (last_used, digest, length) in candidates {
            if remaining <= limit {
                break;
            }
            debug!(digest = %digest, length, last_used, "Selected eviction victim");
            remaining -= length;
            victims.push(digest.clone());
        }

        EvictionPlan {
            victims,
            total_before: total,
            total_after: remaining,
        }
    }

    /// Remove the plan's victims from `directory`, returning the dropped keys
    pub fn apply(plan: &EvictionPlan, directory: &mut AttachmentDirectory) -> Vec<String> {
        plan.victims
            .iter()
            .flat_map(|digest| directory.remove_digest(digest))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::records::{encode_key, DIRECTORY_DOC_ID};
    use crate::store::{DocumentStore, MemoryStore};
    use bytes::Bytes;

    /// Store `entries` as (key, content) and return fresh snapshots
    async fn snapshot(
        entries: &[(&str, &str)],
        touches: &[(&str, u64)],
    ) -> (AttachmentDirectory, AccessLedger) {
        let store = MemoryStore::new();
        for (key, content) in entries {
            let rev = AttachmentDirectory::load(&store).await.unwrap().revision();
            store
                .put_attachment(
                    DIRECTORY_DOC_ID,
                    &encode_key(key),
                    rev,
                    Bytes::copy_from_slice(content.as_bytes()),
                    "application/octet-stream",
                )
                .await
                .unwrap();
        }

        let mut ledger = AccessLedger::load(&store).await.unwrap();
        for (content, at) in touches {
            ledger.touch(&Digest::of(content.as_bytes()), *at);
        }

        (AttachmentDirectory::load(&store).await.unwrap(), ledger)
    }

    fn policy(max_size: u64) -> EvictionPolicy {
        EvictionPolicy::new(&CacheConfig::with_max_size(max_size))
    }

    #[tokio::test]
    async fn test_no_eviction_within_budget() {
        let (directory, ledger) =
            snapshot(&[("foo", "foo"), ("bar", "bar")], &[("foo", 1), ("bar", 2)]).await;

        let plan = policy(6).plan(&directory, &ledger);
        assert!(plan.is_empty());
        assert_eq!(plan.total_before, 6);

        // Unlimited never evicts
        let plan = policy(0).plan(&directory, &ledger);
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used_first() {
        let (mut directory, ledger) = snapshot(
            &[("foo", "foo"), ("bar", "bar"), ("foobar", "foobar")],
            &[("foo", 3), ("bar", 2), ("foobar", 4)],
        )
        .await;

        let plan = policy(10).plan(&directory, &ledger);
        assert_eq!(plan.victims, vec![Digest::of(b"bar")]);
        assert_eq!(plan.total_before, 12);
        assert_eq!(plan.total_after, 9);

        let dropped = EvictionPolicy::apply(&plan, &mut directory);
        assert_eq!(dropped, vec!["bar".to_string()]);
        assert!(directory.contains("foo"));
        assert!(directory.contains("foobar"));
    }

    #[tokio::test]
    async fn test_oversized_sole_entry_is_evicted() {
        let (mut directory, ledger) = snapshot(&[("foo", "foo")], &[("foo", 1)]).await;

        let plan = policy(1).plan(&directory, &ledger);
        assert_eq!(plan.total_after, 0);

        EvictionPolicy::apply(&plan, &mut directory);
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn test_aliases_evicted_together_and_counted_once() {
        let (mut directory, ledger) = snapshot(
            &[("a", "foo"), ("b", "foo"), ("c", "bar")],
            &[("foo", 1), ("bar", 2)],
        )
        .await;

        // 3 distinct bytes of "foo" + 3 of "bar"
        let plan = policy(5).plan(&directory, &ledger);
        assert_eq!(plan.total_before, 6);
        assert_eq!(plan.victims, vec![Digest::of(b"foo")]);

        let mut dropped = EvictionPolicy::apply(&plan, &mut directory);
        dropped.sort();
        assert_eq!(dropped, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn test_ties_break_on_digest_order() {
        let (directory, ledger) =
            snapshot(&[("x", "xxx"), ("y", "yyy")], &[("xxx", 7), ("yyy", 7)]).await;

        let expected = std::cmp::min(Digest::of(b"xxx"), Digest::of(b"yyy"));
        let plan = policy(3).plan(&directory, &ledger);
        assert_eq!(plan.victims, vec![expected]);
    }

    #[tokio::test]
    async fn test_untracked_digest_is_oldest() {
        let (directory, ledger) = snapshot(&[("x", "xxx"), ("y", "yyy")], &[("xxx", 1)]).await;

        let plan = policy(3).plan(&directory, &ledger);
        assert_eq!(plan.victims, vec![Digest::of(b"yyy")]);
    }
}
