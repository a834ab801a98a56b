//! Context enrichment for retrieval queries
//!
//! Rewrites a user query into a RAG-friendly one by appending learned
//! context in a bracketed tail: job statistics (typical duration, failure
//! history), knowledge-graph relationships (dependencies, resources), and
//! temporal framing for time words. Fan-out is capped so context never
//! dominates the query, and the whole tail is truncated to a configured
//! character budget. A query with nothing to add passes through unchanged.

use crate::patterns::PatternTable;
use dashmap::DashMap;
use sentra_core::Result;
use sentra_graph::KnowledgeGraph;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Jobs consulted for KG context per query
const MAX_JOBS_FOR_KG_CONTEXT: usize = 3;
/// Dependencies shown per job
const MAX_DEPS_SHOWN: usize = 5;
/// Resources shown per job
const MAX_RESOURCES_SHOWN: usize = 3;
/// Failure reasons shown in a failure-history fragment
const MAX_FAILURE_REASONS_SHOWN: usize = 3;
/// Executions required before duration statistics are trusted
const MIN_EXECUTIONS_FOR_PATTERN: u64 = 5;
/// Executions required before failure-rate statistics are trusted
const MIN_EXECUTIONS_FOR_FAILURES: u64 = 10;
/// Failure rate above which the history fragment appears
const FAILURE_RATE_THRESHOLD: f64 = 0.05;

/// Kinds of context fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrichmentKind {
    /// Typical duration / start hour of a job
    JobPattern,
    /// Failure rate and common failure reasons
    FailureHistory,
    /// Upstream dependencies from the knowledge graph
    DependencyContext,
    /// Resources the job uses
    ResourceContext,
    /// Time-window framing
    TemporalContext,
}

impl EnrichmentKind {
    /// Stable name for statistics
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentKind::JobPattern => "job_pattern",
            EnrichmentKind::FailureHistory => "failure_history",
            EnrichmentKind::DependencyContext => "dependency_context",
            EnrichmentKind::ResourceContext => "resource_context",
            EnrichmentKind::TemporalContext => "temporal_context",
        }
    }
}

/// Learned execution statistics for one job
#[derive(Debug, Clone, Default)]
pub struct JobStats {
    /// Executions observed
    pub execution_count: u64,
    /// Sum of observed durations in seconds
    pub total_duration_seconds: f64,
    /// Failed executions observed
    pub failure_count: u64,
    /// Distinct failure reasons, most recent first
    pub common_failure_reasons: Vec<String>,
    /// Typical start hour (0-23)
    pub typical_start_hour: u8,
}

impl JobStats {
    /// Mean duration in seconds
    pub fn avg_duration_seconds(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.total_duration_seconds / self.execution_count as f64
        }
    }

    /// Fraction of executions that failed
    pub fn failure_rate(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.execution_count as f64
        }
    }
}

/// Concurrent registry of per-job execution statistics
///
/// Fed by the platform as executions are observed; read by the enricher.
#[derive(Default)]
pub struct JobStatsRegistry {
    stats: DashMap<String, JobStats>,
}

impl JobStatsRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observed execution of a job
    pub fn record_execution(
        &self,
        job: &str,
        duration_seconds: f64,
        success: bool,
        failure_reason: Option<&str>,
        start_hour: u8,
    ) {
        let mut entry = self.stats.entry(job.to_uppercase()).or_default();
        entry.execution_count += 1;
        entry.total_duration_seconds += duration_seconds.max(0.0);
        entry.typical_start_hour = start_hour % 24;
        if !success {
            entry.failure_count += 1;
            if let Some(reason) = failure_reason {
                let reason = reason.to_string();
                entry.common_failure_reasons.retain(|r| r != &reason);
                entry.common_failure_reasons.insert(0, reason);
                entry.common_failure_reasons.truncate(10);
            }
        }
    }

    /// Statistics for a job, if any were recorded
    pub fn get(&self, job: &str) -> Option<JobStats> {
        self.stats.get(&job.to_uppercase()).map(|s| s.clone())
    }
}

/// Result of enriching one query
#[derive(Debug, Clone)]
pub struct EnrichmentResult {
    /// The query as given
    pub original_query: String,
    /// The query with the context tail appended (or unchanged)
    pub enriched_query: String,
    /// Context fragments that were added
    pub fragments: Vec<String>,
    /// Kinds of enrichment applied, in order
    pub kinds: Vec<EnrichmentKind>,
    /// Entities extracted from the query
    pub entities: BTreeMap<String, Vec<String>>,
}

impl EnrichmentResult {
    /// Whether any context was added
    pub fn was_enriched(&self) -> bool {
        !self.kinds.is_empty()
    }
}

/// Enricher statistics
#[derive(Debug, Clone)]
pub struct EnricherStats {
    /// Queries seen
    pub total_queries: u64,
    /// Queries that gained at least one fragment
    pub queries_enriched: u64,
    /// queries_enriched / total_queries
    pub enrichment_rate: f64,
    /// Fragment counts by kind name
    pub counts_by_kind: BTreeMap<String, u64>,
}

/// Entity extraction + context injection for retrieval queries
pub struct ContextEnricher {
    kg: Option<Arc<KnowledgeGraph>>,
    registry: Arc<JobStatsRegistry>,
    patterns: &'static PatternTable,
    max_context_len: usize,
    total_queries: AtomicU64,
    queries_enriched: AtomicU64,
    counts_by_kind: DashMap<&'static str, u64>,
}

impl ContextEnricher {
    /// Build an enricher; `kg` is optional so the enricher degrades to
    /// statistics-and-temporal-only when the graph is absent
    pub fn new(
        kg: Option<Arc<KnowledgeGraph>>,
        registry: Arc<JobStatsRegistry>,
        max_context_len: usize,
    ) -> Self {
        ContextEnricher {
            kg,
            registry,
            patterns: PatternTable::default_table(),
            max_context_len,
            total_queries: AtomicU64::new(0),
            queries_enriched: AtomicU64::new(0),
            counts_by_kind: DashMap::new(),
        }
    }

    /// Enrich a query with learned context
    pub async fn enrich_query(&self, query: &str) -> Result<EnrichmentResult> {
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let entities = self.patterns.extract_entities(query);
        let mut fragments: Vec<String> = Vec::new();
        let mut kinds: Vec<EnrichmentKind> = Vec::new();

        let no_jobs = Vec::new();
        let jobs = entities.get("job").unwrap_or(&no_jobs);

        // Learned statistics
        for job in jobs {
            let Some(stats) = self.registry.get(job) else {
                continue;
            };
            if stats.execution_count >= MIN_EXECUTIONS_FOR_PATTERN
                && stats.avg_duration_seconds() > 0.0
            {
                fragments.push(format!(
                    "job {job} typically runs ~{}min, starting around {:02}:00",
                    (stats.avg_duration_seconds() / 60.0).round() as u64,
                    stats.typical_start_hour
                ));
                kinds.push(EnrichmentKind::JobPattern);
            }
            if stats.failure_rate() > FAILURE_RATE_THRESHOLD
                && stats.execution_count >= MIN_EXECUTIONS_FOR_FAILURES
            {
                let reasons = if stats.common_failure_reasons.is_empty() {
                    "various".to_string()
                } else {
                    stats
                        .common_failure_reasons
                        .iter()
                        .take(MAX_FAILURE_REASONS_SHOWN)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                fragments.push(format!(
                    "job {job} fails {:.0}% of runs, common errors: {reasons}",
                    stats.failure_rate() * 100.0
                ));
                kinds.push(EnrichmentKind::FailureHistory);
            }
        }

        // Knowledge-graph relationships, fan-out capped
        if let Some(kg) = &self.kg {
            for job in jobs.iter().take(MAX_JOBS_FOR_KG_CONTEXT) {
                let chain = kg.dependency_chain(job, 2).await;
                if chain.len() > 1 {
                    let deps: Vec<&str> = chain[1..]
                        .iter()
                        .take(MAX_DEPS_SHOWN)
                        .map(String::as_str)
                        .collect();
                    fragments.push(format!("job {job} depends on: {}", deps.join(", ")));
                    kinds.push(EnrichmentKind::DependencyContext);
                }

                let resources = kg.resources_of_job(job).await;
                if !resources.is_empty() {
                    let shown: Vec<&str> = resources
                        .iter()
                        .take(MAX_RESOURCES_SHOWN)
                        .map(String::as_str)
                        .collect();
                    fragments.push(format!("job {job} uses resources: {}", shown.join(", ")));
                    kinds.push(EnrichmentKind::ResourceContext);
                }
            }
        }

        // Temporal framing
        if let Some(context) = self.patterns.temporal_context(query) {
            fragments.push(format!("time context: {context}"));
            kinds.push(EnrichmentKind::TemporalContext);
        }

        let enriched_query = self.build_enriched(query, &fragments);

        if !kinds.is_empty() {
            self.queries_enriched.fetch_add(1, Ordering::Relaxed);
            for kind in &kinds {
                *self.counts_by_kind.entry(kind.as_str()).or_insert(0) += 1;
            }
        }

        debug!(
            original_len = query.len(),
            enriched_len = enriched_query.len(),
            fragments = fragments.len(),
            "query enrichment"
        );

        Ok(EnrichmentResult {
            original_query: query.to_string(),
            enriched_query,
            fragments,
            kinds,
            entities,
        })
    }

    fn build_enriched(&self, query: &str, fragments: &[String]) -> String {
        if fragments.is_empty() {
            return query.to_string();
        }
        let mut context = fragments.join("; ");
        if context.chars().count() > self.max_context_len {
            context = context.chars().take(self.max_context_len).collect();
            context.push_str("...");
        }
        format!("{query} [{context}]")
    }

    /// Enricher statistics
    pub fn stats(&self) -> EnricherStats {
        let total = self.total_queries.load(Ordering::Relaxed);
        let enriched = self.queries_enriched.load(Ordering::Relaxed);
        EnricherStats {
            total_queries: total,
            queries_enriched: enriched,
            enrichment_rate: if total > 0 {
                enriched as f64 / total as f64
            } else {
                0.0
            },
            counts_by_kind: self
                .counts_by_kind
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
        }
    }
}
