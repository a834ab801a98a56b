//! Continual-learning feedback loop
//!
//! Four cooperating pieces adjust future retrievals from what users and
//! auditors report about past ones:
//!
//! - `FeedbackStore` + `FeedbackAwareRetriever`: persisted per-(query,
//!   document) ratings folded into retrieval scores
//! - `ActiveLearningQueue`: uncertainty detection, the human review queue,
//!   and query-pattern novelty tracking
//! - `AuditToKGPipeline`: audit findings turned into negative knowledge
//!   edges and RAG penalties
//! - `ContextEnricher`: entity extraction and learned-context injection
//!   into retrieval queries
//!
//! The regex tables driving extraction and classification live in
//! `patterns.toml` as data, shared by all four.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod enrich;
pub mod feedback_store;
pub mod patterns;
pub mod retriever;
pub mod review;

pub use audit::{AuditFinding, AuditOutcome, AuditToKGPipeline, TripletExtractor};
pub use enrich::{ContextEnricher, EnrichmentKind, EnrichmentResult, JobStats, JobStatsRegistry};
pub use feedback_store::{FeedbackRecord, FeedbackStats, FeedbackStore};
pub use patterns::{normalize_query, query_fingerprint, ErrorType, PatternTable};
pub use retriever::{FeedbackAwareRetriever, RetrievedDoc, Retriever, RetrieverStats};
pub use review::{
    ActiveLearningQueue, ReviewDecision, ReviewItem, ReviewQueueStats, ReviewReason,
    ReviewSignals, ReviewStatus, SuggestedAction,
};
