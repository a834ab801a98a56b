//! Sharded TTL cache with WAL durability and snapshotting
//!
//! The primary concurrent key-value surface of the substrate:
//! - `ShardedTTLCache`: get/set/delete over a fixed vector of shards, each
//!   guarded by its own mutex, with deterministic xxh3 key placement
//! - `MemoryManager`: entry-count and sampled-memory bounds, scored LRU
//!   eviction
//! - `TransactionManager`: multi-key operation tracking with sticky
//!   commit/rollback state and timeout expiry
//! - WAL integration: mutations are logged and fsynced before they are
//!   applied; the log is drained exactly once on first use after a restart
//! - Snapshot integration: point-in-time JSON dumps and validated restores
//! - Background loops: expired-entry cleanup and advisory adaptive-TTL
//!   warming, both cancellable
//!
//! # Locking discipline
//!
//! Shard mutexes are never held across an await point and never held two at
//! a time; cross-shard work (rollback, restore, eviction) visits shards in
//! ascending index order, one lock at a time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod health;
pub mod memory;
pub mod sharded;
pub mod transaction;

pub use entry::CacheEntry;
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use memory::MemoryManager;
pub use sharded::{CacheStats, RollbackKind, RollbackOp, ShardedTTLCache};
pub use transaction::{
    TransactionInfo, TransactionManager, TransactionRecord, TransactionStatus, TxOperation,
};
