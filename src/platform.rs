//! Platform handle: dependency-ordered startup and reverse shutdown
//!
//! Construction order is WAL → cache (which owns WAL, memory, and
//! persistence) → feedback store → review queue → knowledge graph → audit
//! pipeline → enricher → KG cache manager → KG sync manager. Shutdown runs
//! in reverse, stopping background loops before flushing the WAL and
//! closing files.

use parking_lot::Mutex;
use sentra_cache::{ShardedTTLCache, TransactionManager};
use sentra_core::{Config, Result};
use sentra_graph::{KGCacheManager, KGSyncManager, KnowledgeGraph, SchedulerSource};
use sentra_learning::{
    ActiveLearningQueue, AuditToKGPipeline, ContextEnricher, FeedbackAwareRetriever,
    FeedbackStore, JobStatsRegistry, Retriever, TripletExtractor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Transaction expiry sweep period
const TRANSACTION_SWEEP_SECS: u64 = 60;

/// Review-queue expiry sweep period
const REVIEW_SWEEP_SECS: u64 = 3600;

/// Context budget for query enrichment, in characters
const ENRICHMENT_CONTEXT_BUDGET: usize = 500;

/// Builder for the [`Sentra`] platform handle
pub struct SentraBuilder {
    config: Config,
    scheduler: Option<Arc<dyn SchedulerSource>>,
    extractor: Option<Arc<dyn TripletExtractor>>,
}

impl SentraBuilder {
    /// Start building from a configuration
    pub fn new(config: Config) -> Self {
        SentraBuilder {
            config,
            scheduler: None,
            extractor: None,
        }
    }

    /// Attach the external scheduler adapter; enables delta sync
    pub fn with_scheduler_source(mut self, source: Arc<dyn SchedulerSource>) -> Self {
        self.scheduler = Some(source);
        self
    }

    /// Attach an external triplet extractor for the audit pipeline
    pub fn with_triplet_extractor(mut self, extractor: Arc<dyn TripletExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Construct every subsystem in dependency order and start the
    /// background loops
    pub async fn build(self) -> Result<Sentra> {
        let config = self.config;
        config.validate()?;

        // Cache first: it owns WAL, memory manager, and snapshots
        let cache = ShardedTTLCache::new(config.cache.clone()).await?;
        let transactions = Arc::new(TransactionManager::new(
            config.transactions.max_active,
            config.transactions.timeout_seconds,
        ));

        // Learning stores
        let feedback = Arc::new(FeedbackStore::open(&config.feedback.dir)?);
        let review_queue = Arc::new(ActiveLearningQueue::open(
            &config.review.dir,
            config.review.max_age_days,
        )?);

        // Knowledge graph and its consumers
        let kg = Arc::new(KnowledgeGraph::open(&config.kg.dir)?);
        kg.reload().await?;

        let mut audit =
            AuditToKGPipeline::new(Arc::clone(&kg), Arc::clone(&feedback))
                .with_review_queue(Arc::clone(&review_queue));
        if let Some(extractor) = self.extractor {
            audit = audit.with_extractor(extractor);
        }
        let audit = Arc::new(audit);

        let job_stats = Arc::new(JobStatsRegistry::new());
        let enricher = Arc::new(ContextEnricher::new(
            Some(Arc::clone(&kg)),
            Arc::clone(&job_stats),
            ENRICHMENT_CONTEXT_BUDGET,
        ));

        // Staleness control: refresh rebuilds the in-memory graph
        let kg_cache = Arc::new(KGCacheManager::new(config.kg.cache_ttl_seconds));
        {
            let kg = Arc::clone(&kg);
            kg_cache.register_refresh_callback(Arc::new(move || {
                let kg = Arc::clone(&kg);
                Box::pin(async move { kg.reload().await })
            }));
        }

        // Delta sync: scheduler changes upsert into the graph and mark the
        // in-memory copy stale
        let kg_sync = self.scheduler.map(|source| {
            let manager = Arc::new(KGSyncManager::new(source, config.kg.sync_interval_seconds));
            let kg_for_sync = Arc::clone(&kg);
            manager.register_callback(Arc::new(move |changes| {
                let kg = Arc::clone(&kg_for_sync);
                Box::pin(async move { apply_sync_changes(&kg, changes).await })
            }));
            manager
        });

        let platform = Sentra {
            config,
            cache,
            transactions,
            feedback,
            review_queue,
            audit,
            enricher,
            job_stats,
            kg,
            kg_cache,
            kg_sync,
            tasks: Mutex::new(Vec::new()),
        };
        platform.start_background_loops();
        info!("sentra platform started");
        Ok(platform)
    }
}

/// Upsert scheduler delta changes into the knowledge graph
async fn apply_sync_changes(
    kg: &KnowledgeGraph,
    changes: Vec<sentra_graph::SyncChange>,
) -> Result<()> {
    use sentra_graph::{ChangeType, NodeType};
    for change in changes {
        let node_type = match change.entity_kind.as_str() {
            "job" => NodeType::Job,
            "job_stream" => NodeType::JobStream,
            "workstation" => NodeType::Workstation,
            "resource" => NodeType::Resource,
            _ => NodeType::Concept,
        };
        match change.change_type {
            ChangeType::Create | ChangeType::Update => {
                let properties = change
                    .properties
                    .as_ref()
                    .and_then(|p| p.as_object().cloned())
                    .unwrap_or_default();
                kg.add_node(&change.entity_id, node_type, properties).await?;
            }
            ChangeType::Delete => {
                kg.remove_node(&change.entity_id).await?;
            }
        }
    }
    Ok(())
}

/// The assembled platform
pub struct Sentra {
    config: Config,
    cache: Arc<ShardedTTLCache>,
    transactions: Arc<TransactionManager>,
    feedback: Arc<FeedbackStore>,
    review_queue: Arc<ActiveLearningQueue>,
    audit: Arc<AuditToKGPipeline>,
    enricher: Arc<ContextEnricher>,
    job_stats: Arc<JobStatsRegistry>,
    kg: Arc<KnowledgeGraph>,
    kg_cache: Arc<KGCacheManager>,
    kg_sync: Option<Arc<KGSyncManager>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Sentra {
    fn start_background_loops(&self) {
        self.cache.start();
        self.kg_cache.start_background_refresh();
        if let Some(sync) = &self.kg_sync {
            sync.start();
        }

        // Transaction expiry sweep
        let transactions = Arc::clone(&self.transactions);
        let txn_sweep = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(TRANSACTION_SWEEP_SECS)).await;
                transactions.cleanup_expired();
            }
        });

        // Review-queue expiry sweep
        let review_queue = Arc::clone(&self.review_queue);
        let review_sweep = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(REVIEW_SWEEP_SECS)).await;
                if let Err(e) = review_queue.expire_old().await {
                    warn!(error = %e, "review expiry sweep failed");
                }
            }
        });

        self.tasks.lock().extend([txn_sweep, review_sweep]);
    }

    /// Stop background loops and flush durable state, reverse of startup
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(sync) = &self.kg_sync {
            sync.stop();
        }
        self.kg_cache.stop_background_refresh();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.cache.stop().await?;
        info!("sentra platform stopped");
        Ok(())
    }

    /// Wrap a base retriever with feedback-aware reranking
    pub fn retriever(&self, base: Arc<dyn Retriever>) -> FeedbackAwareRetriever {
        FeedbackAwareRetriever::new(
            base,
            Arc::clone(&self.feedback),
            self.config.feedback.weight,
            true,
        )
    }

    /// The configuration this platform was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The sharded TTL cache
    pub fn cache(&self) -> &Arc<ShardedTTLCache> {
        &self.cache
    }

    /// The transaction manager
    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    /// The feedback store
    pub fn feedback(&self) -> &Arc<FeedbackStore> {
        &self.feedback
    }

    /// The active-learning review queue
    pub fn review_queue(&self) -> &Arc<ActiveLearningQueue> {
        &self.review_queue
    }

    /// The audit-to-knowledge-graph pipeline
    pub fn audit(&self) -> &Arc<AuditToKGPipeline> {
        &self.audit
    }

    /// The context enricher
    pub fn enricher(&self) -> &Arc<ContextEnricher> {
        &self.enricher
    }

    /// The per-job execution statistics registry feeding the enricher
    pub fn job_stats(&self) -> &Arc<JobStatsRegistry> {
        &self.job_stats
    }

    /// The knowledge graph
    pub fn kg(&self) -> &Arc<KnowledgeGraph> {
        &self.kg
    }

    /// The knowledge-graph cache manager
    pub fn kg_cache(&self) -> &Arc<KGCacheManager> {
        &self.kg_cache
    }

    /// The delta-sync manager, when a scheduler source was attached
    pub fn kg_sync(&self) -> Option<&Arc<KGSyncManager>> {
        self.kg_sync.as_ref()
    }
}
