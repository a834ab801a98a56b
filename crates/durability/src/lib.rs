//! Durability layer for the Sentra cache
//!
//! Two on-disk formats, both UTF-8 JSON so they can be inspected with
//! ordinary tools:
//!
//! - **WAL**: line-delimited, checksummed operation records in rotated
//!   `wal_<timestamp>.log` segments. Every mutating cache operation is
//!   appended and fsynced before it is applied, and replayed in mtime order
//!   after a crash.
//! - **Snapshots**: point-in-time `cache_snapshot_<timestamp>.json`
//!   documents with a `_metadata` header and one map per shard.
//!
//! Corrupt records are a warning and a skip, never a crash: a torn line or
//! a digest mismatch costs one operation, not the whole log.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod snapshot;
pub mod wal;

pub use snapshot::{PersistenceManager, SnapshotDocument, SnapshotEntry, SnapshotInfo};
pub use wal::{WalEntry, WalOperation, WriteAheadLog};
