//! Sentra: in-process storage and coordination substrate for AI-assisted
//! workload scheduler operations
//!
//! Three subsystems share one discipline: coordinate concurrent work,
//! enforce ordering invariants, and recover cleanly from partial failure.
//!
//! - **Sharded TTL cache** with write-ahead logging and snapshotting
//!   ([`sentra_cache`], [`sentra_durability`])
//! - **Continual-learning loop**: feedback store, feedback-aware reranking,
//!   active-learning review queue, audit-to-knowledge-graph pipeline, and
//!   query enrichment ([`sentra_learning`])
//! - **Knowledge graph** with TTL-refresh control and incremental delta
//!   sync against the external scheduler ([`sentra_graph`])
//!
//! The [`Sentra`] platform handle wires everything together in dependency
//! order and tears it down in reverse. External collaborators (the
//! scheduler itself, an LLM extractor, a base retriever) plug in through
//! traits; the substrate never speaks their wire protocols.
//!
//! ```no_run
//! use sentra::{Config, SentraBuilder};
//!
//! # async fn demo() -> sentra_core::Result<()> {
//! let config = Config::default().with_data_dir("./data").with_wal(true);
//! let platform = SentraBuilder::new(config).build().await?;
//! platform.cache().set("greeting", "hello".into(), None).await?;
//! platform.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod platform;

pub use platform::{Sentra, SentraBuilder};
pub use sentra_cache::{
    CacheStats, HealthReport, HealthStatus, RollbackKind, RollbackOp, ShardedTTLCache,
    TransactionManager, TransactionStatus, TxOperation,
};
pub use sentra_core::{Config, Error, Result, Value};
pub use sentra_durability::{PersistenceManager, WalEntry, WalOperation, WriteAheadLog};
pub use sentra_graph::{
    ChangeType, EntityRecord, GraphEdge, GraphNode, KGCacheManager, KGSyncManager, KnowledgeGraph,
    NodeType, RelationType, SchedulerSource, SyncChange, Triplet,
};
pub use sentra_learning::{
    ActiveLearningQueue, AuditFinding, AuditToKGPipeline, ContextEnricher, FeedbackAwareRetriever,
    FeedbackStore, JobStatsRegistry, RetrievedDoc, Retriever, ReviewReason, ReviewSignals,
    ReviewStatus, TripletExtractor,
};

/// Initialize tracing from the `RUST_LOG` environment filter
///
/// Call once at process start; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
