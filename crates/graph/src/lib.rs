//! Knowledge graph with persistence, staleness control, and delta sync
//!
//! A typed graph over scheduler entities (jobs, streams, workstations,
//! resources, error codes, commands) and learned patterns:
//!
//! - `KnowledgeGraph`: sqlite-persisted nodes and edges with an in-memory
//!   working copy for traversals. Writes go to persistent storage first;
//!   the in-memory copy is a cache rebuilt by `reload()`.
//! - `KGCacheManager`: TTL-based staleness for that in-memory copy, with a
//!   refresh-callback registry and a background refresh loop.
//! - `KGSyncManager`: periodic delta sync against an external scheduler
//!   snapshot, emitting Create/Update/Delete changes to registered
//!   callbacks.
//!
//! Negative knowledge is first-class: error-knowledge edges record
//! associations known to be wrong. They never replace positive edges and
//! positive traversals ignore them; queries opt in with `include_errors`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache_manager;
pub mod graph;
pub mod model;
pub mod sync;

pub use cache_manager::{KGCacheManager, KGCacheStats};
pub use graph::{GraphStatistics, KnowledgeGraph};
pub use model::{GraphEdge, GraphNode, NodeType, RelationType, Triplet};
pub use sync::{ChangeType, EntityRecord, KGSyncManager, SchedulerSource, SyncChange, SyncStats};
