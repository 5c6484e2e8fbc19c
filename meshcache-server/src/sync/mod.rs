//! Anti-entropy sync between nodes
//!
//! - Outbound queue of local mutations with per-peer delivery tracking
//! - Retry with exponential backoff and jitter
//! - Conflict resolution (last-write-wins, merge, custom)

pub mod conflict;
pub mod queue;
pub mod retry;

pub use conflict::{
    ConflictHandler, ConflictResolver, JsonMergeStrategy, MergeStrategy, Resolution, lww_order,
};
pub use queue::{BatchReport, SyncItem, SyncQueue, SyncQueueProcessor, SyncStats};
pub use retry::RetryPolicy;
