//! Size-bounded LRU cache over a document/attachment store
//!
//! Keeps an attachment directory and an access ledger in the backing store
//! and evicts least recently used content once the distinct-content
//! footprint exceeds the configured budget.

pub mod eviction;
pub mod lru;
pub mod records;
pub mod serializer;

pub use eviction::{EvictionPlan, EvictionPolicy};
pub use lru::{CacheInfo, CacheStats, ItemInfo, LruCache};
pub use records::{AccessLedger, AttachmentDirectory};
pub use serializer::MutationSerializer;
