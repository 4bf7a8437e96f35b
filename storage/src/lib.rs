pub mod client;
pub mod error;
pub mod memory;

pub use client::{BulkAction, BulkResult, IndexStore, OpenSearchIndexStore};
pub use error::StoreError;
pub use memory::InMemoryIndexStore;
