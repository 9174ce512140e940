//! Attachment LRU
//!
//! A size-bounded, content-addressed cache layered over a document store.
//! Identical content stored under different keys is kept once; when the
//! distinct-content footprint exceeds the budget, least recently used
//! content is evicted.

pub mod cache;
pub mod config;
pub mod error;
pub mod store;

pub use cache::{CacheInfo, CacheStats, ItemInfo, LruCache};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use store::{DocumentStore, FsStore, MemoryStore};
