//! Backing document/attachment store

pub mod backend;
pub mod errors;
pub mod fs;
pub mod memory;
pub mod types;

pub use backend::DocumentStore;
pub use errors::StoreError;
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use types::*;
