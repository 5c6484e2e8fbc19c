pub mod error;
pub mod local_store;
pub mod tombstone;
pub mod types;

pub use error::{CacheError, Result};
pub use local_store::LocalStore;
pub use tombstone::TombstoneManager;
pub use types::{CacheEntry, StoreConfig, StoreStats, Tombstone, now_millis};
