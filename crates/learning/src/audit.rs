//! Audit-to-knowledge-graph pipeline
//!
//! Turns an auditor's finding (a response judged incorrect, with a
//! confidence and reason) into persistent negative knowledge:
//!
//! 1. classify the error by regex over the reason text
//! 2. extract entities from query, response, and reason
//! 3. generate error triplets from per-error-type rules
//! 4. optionally ask an external extractor for up to three more triplets
//!    at discounted confidence, skipping on any failure
//! 5. insert nodes and error-knowledge edges into the knowledge graph
//! 6. penalize related documents in the feedback store
//!
//! The pipeline only writes negative knowledge; it never removes or
//! modifies positive edges.

use crate::feedback_store::FeedbackStore;
use crate::patterns::{query_fingerprint, ErrorType, PatternTable};
use crate::review::ActiveLearningQueue;
use sentra_core::{now_epoch, Result};
use sentra_graph::{KnowledgeGraph, NodeType, RelationType, Triplet};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Findings below this confidence are not written to the graph
pub const MIN_CONFIDENCE_FOR_KG: f64 = 0.7;

/// Extra triplets accepted from the external extractor
const MAX_EXTRACTOR_TRIPLETS: usize = 3;

/// Confidence discount applied to extractor-produced triplets
const EXTRACTOR_CONFIDENCE_DISCOUNT: f64 = 0.8;

/// Synthetic penalty doc ids derived from entities are capped here
const MAX_SYNTHETIC_PENALTIES: usize = 5;

/// User id attached to auditor-produced feedback rows
pub const AUDIT_USER_ID: &str = "system:audit_pipeline";

/// One finding from the response auditor
#[derive(Debug, Clone)]
pub struct AuditFinding {
    /// Id of the audited memory/conversation record
    pub memory_id: String,
    /// The user's query
    pub query: String,
    /// The response that was judged
    pub response: String,
    /// Whether the auditor judged the response incorrect
    pub is_incorrect: bool,
    /// Auditor confidence in [0, 1]
    pub confidence: f64,
    /// Why the response is wrong
    pub reason: String,
    /// Document ids the response cited, when known
    pub referenced_doc_ids: Vec<String>,
}

/// Seam to an external (LLM) triplet extractor
///
/// Failures are swallowed: a broken extractor yields zero extra triplets,
/// never a failed audit.
#[async_trait::async_trait]
pub trait TripletExtractor: Send + Sync {
    /// Propose additional error triplets for a finding
    async fn extract(&self, query: &str, response: &str, reason: &str) -> Result<Vec<Triplet>>;
}

/// Summary of one processed finding
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    /// "processed" or "skipped"
    pub status: &'static str,
    /// Why a skip happened, when it did
    pub skip_reason: Option<&'static str>,
    /// Triplets generated (rules + extractor)
    pub triplets_extracted: usize,
    /// Error-knowledge edges actually inserted
    pub kg_entries_added: usize,
    /// Feedback rows recorded as penalties
    pub docs_penalized: usize,
    /// Classified error type name
    pub error_type: &'static str,
}

/// Converts audit findings into typed negative knowledge and RAG penalties
pub struct AuditToKGPipeline {
    kg: Arc<KnowledgeGraph>,
    feedback: Arc<FeedbackStore>,
    review_queue: Option<Arc<ActiveLearningQueue>>,
    extractor: Option<Arc<dyn TripletExtractor>>,
    patterns: &'static PatternTable,
    auto_penalize: bool,
    min_confidence: f64,
}

impl AuditToKGPipeline {
    /// Build the pipeline over a graph and feedback store
    pub fn new(kg: Arc<KnowledgeGraph>, feedback: Arc<FeedbackStore>) -> Self {
        AuditToKGPipeline {
            kg,
            feedback,
            review_queue: None,
            extractor: None,
            patterns: PatternTable::default_table(),
            auto_penalize: true,
            min_confidence: MIN_CONFIDENCE_FOR_KG,
        }
    }

    /// Feed processed error patterns to the review queue's past-error probe
    pub fn with_review_queue(mut self, queue: Arc<ActiveLearningQueue>) -> Self {
        self.review_queue = Some(queue);
        self
    }

    /// Attach an external triplet extractor
    pub fn with_extractor(mut self, extractor: Arc<dyn TripletExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Disable automatic RAG penalties
    pub fn without_penalties(mut self) -> Self {
        self.auto_penalize = false;
        self
    }

    /// Process one audit finding end to end
    pub async fn process(&self, finding: &AuditFinding) -> Result<AuditOutcome> {
        if !finding.is_incorrect {
            return Ok(skipped("not_incorrect"));
        }
        if finding.confidence < self.min_confidence {
            return Ok(skipped("low_confidence"));
        }

        let error_type = self.patterns.classify_error(&finding.reason);
        info!(
            memory_id = %finding.memory_id,
            confidence = finding.confidence,
            error_type = error_type.as_str(),
            "processing audit finding"
        );

        let mut triplets = self.build_triplets(finding, error_type);
        triplets.extend(self.extractor_triplets(finding).await);

        let mut added = 0usize;
        for triplet in &triplets {
            let mut props = serde_json::Map::new();
            props.insert("error_reason".to_string(), finding.reason.clone().into());
            props.insert("source_query".to_string(), finding.query.clone().into());
            props.insert("is_error_knowledge".to_string(), true.into());
            props.insert("created_at".to_string(), now_epoch().into());
            match self.kg.add_triplet(triplet, props).await {
                Ok(_) => added += 1,
                Err(e) => {
                    warn!(
                        subject = %triplet.subject_id,
                        error = %e,
                        "failed to add audit triplet"
                    );
                }
            }
        }

        let docs_penalized = if self.auto_penalize {
            self.penalize_documents(finding).await
        } else {
            0
        };

        if let Some(queue) = &self.review_queue {
            queue.record_error_pattern(query_fingerprint(&finding.query));
            for text in [&finding.query, &finding.response, &finding.reason] {
                for code in self.entities_of(text, "error_code") {
                    queue.record_error_pattern(code);
                }
            }
        }

        let outcome = AuditOutcome {
            status: "processed",
            skip_reason: None,
            triplets_extracted: triplets.len(),
            kg_entries_added: added,
            docs_penalized,
            error_type: error_type.as_str(),
        };
        info!(
            memory_id = %finding.memory_id,
            triplets = outcome.triplets_extracted,
            kg_entries = outcome.kg_entries_added,
            docs_penalized = outcome.docs_penalized,
            "audit finding processed"
        );
        Ok(outcome)
    }

    fn entities_of(&self, text: &str, kind: &str) -> Vec<String> {
        self.patterns
            .extract_entities(text)
            .remove(kind)
            .unwrap_or_default()
    }

    /// Rule-driven triplet generation per error type
    fn build_triplets(&self, finding: &AuditFinding, error_type: ErrorType) -> Vec<Triplet> {
        let query_entities = self.patterns.extract_entities(&finding.query);
        let response_entities = self.patterns.extract_entities(&finding.response);
        let reason_entities = self.patterns.extract_entities(&finding.reason);

        let empty = Vec::new();
        let query_jobs = query_entities.get("job").unwrap_or(&empty);
        let mut triplets = Vec::new();

        match error_type {
            ErrorType::WrongRecommendation => {
                // All error codes in sight: the recommendation was wrong
                // for them, whichever text mentioned them
                let mut codes: Vec<String> = Vec::new();
                for entities in [&query_entities, &response_entities, &reason_entities] {
                    for code in entities.get("error_code").unwrap_or(&empty) {
                        if !codes.contains(code) {
                            codes.push(code.clone());
                        }
                    }
                }
                for code in &codes {
                    for job in query_jobs {
                        triplets.push(triplet(
                            job,
                            NodeType::Job,
                            RelationType::IncorrectSolutionFor,
                            code,
                            NodeType::ErrorCode,
                            finding,
                        ));
                    }
                    for command in response_entities.get("command").unwrap_or(&empty) {
                        triplets.push(triplet(
                            command,
                            NodeType::Command,
                            RelationType::ShouldNotUseFor,
                            code,
                            NodeType::ErrorCode,
                            finding,
                        ));
                    }
                }
            }
            ErrorType::IrrelevantResponse => {
                let pattern_id = format!("query:{}", query_fingerprint(&finding.query));
                for (kind, names) in &query_entities {
                    let Some(node_type) = node_type_for(kind) else {
                        continue;
                    };
                    for name in names {
                        triplets.push(triplet(
                            name,
                            node_type,
                            RelationType::NotRelevantTo,
                            &pattern_id,
                            NodeType::QueryPattern,
                            finding,
                        ));
                    }
                }
            }
            other => {
                // Association-flavored errors: query jobs incorrectly tied
                // to what the response claimed about them
                let relation = relation_for(other);
                for job in query_jobs {
                    for ws in response_entities.get("workstation").unwrap_or(&empty) {
                        triplets.push(triplet(
                            job,
                            NodeType::Job,
                            relation,
                            ws,
                            NodeType::Workstation,
                            finding,
                        ));
                    }
                    for resource in response_entities.get("resource").unwrap_or(&empty) {
                        triplets.push(triplet(
                            job,
                            NodeType::Job,
                            relation,
                            resource,
                            NodeType::Resource,
                            finding,
                        ));
                    }
                }
            }
        }

        // No entity-level pattern found: record the query/response shape
        if triplets.is_empty() {
            let pattern_id = format!("query:{}", query_fingerprint(&finding.query));
            let response_id = format!("response:{}", response_digest(&finding.response));
            triplets.push(triplet(
                &pattern_id,
                NodeType::QueryPattern,
                relation_for(error_type),
                &response_id,
                NodeType::ResponsePattern,
                finding,
            ));
        }

        triplets
    }

    /// Extra triplets from the external extractor, discounted and filtered
    async fn extractor_triplets(&self, finding: &AuditFinding) -> Vec<Triplet> {
        let Some(extractor) = &self.extractor else {
            return Vec::new();
        };
        match extractor
            .extract(&finding.query, &finding.response, &finding.reason)
            .await
        {
            Ok(extra) => extra
                .into_iter()
                .filter(|t| {
                    // This pipeline writes only negative knowledge
                    if !t.predicate.is_error_knowledge() {
                        warn!(
                            predicate = t.predicate.as_str(),
                            "extractor proposed a positive edge, dropping"
                        );
                        return false;
                    }
                    t.validate().is_ok()
                })
                .take(MAX_EXTRACTOR_TRIPLETS)
                .map(|mut t| {
                    t.confidence *= EXTRACTOR_CONFIDENCE_DISCOUNT;
                    t.source_memory_id = finding.memory_id.clone();
                    t
                })
                .collect(),
            Err(e) => {
                debug!(error = %e, "triplet extractor failed, continuing without");
                Vec::new()
            }
        }
    }

    /// Penalize cited documents, or synthetic entity-derived ids when the
    /// response cited nothing
    async fn penalize_documents(&self, finding: &AuditFinding) -> usize {
        let metadata = serde_json::json!({
            "audit_reason": finding.reason,
            "audit_confidence": finding.confidence,
            "is_audit_penalty": true,
        });

        let doc_ids: Vec<String> = if !finding.referenced_doc_ids.is_empty() {
            finding.referenced_doc_ids.clone()
        } else {
            let mut combined: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for text in [&finding.query, &finding.response] {
                for (kind, names) in self.patterns.extract_entities(text) {
                    combined.entry(kind).or_default().extend(names);
                }
            }
            combined
                .into_iter()
                .flat_map(|(kind, names)| {
                    names
                        .into_iter()
                        .map(move |name| format!("audit:{kind}:{name}"))
                })
                .take(MAX_SYNTHETIC_PENALTIES)
                .collect()
        };

        let mut penalized = 0usize;
        for doc_id in &doc_ids {
            match self
                .feedback
                .record(
                    &finding.query,
                    doc_id,
                    -2,
                    Some(AUDIT_USER_ID),
                    Some(&finding.response),
                    Some(metadata.clone()),
                )
                .await
            {
                Ok(_) => penalized += 1,
                Err(e) => warn!(doc_id = %doc_id, error = %e, "failed to penalize document"),
            }
        }
        penalized
    }

    /// Whether a query touches entities with recorded error knowledge
    ///
    /// Used by routing to warn before repeating a known-bad association.
    pub async fn should_warn_about_query(&self, query: &str) -> bool {
        for (_, names) in self.patterns.extract_entities(query) {
            for name in names {
                if !self.kg.error_edges_from(&name).await.is_empty() {
                    return true;
                }
            }
        }
        false
    }
}

fn skipped(reason: &'static str) -> AuditOutcome {
    AuditOutcome {
        status: "skipped",
        skip_reason: Some(reason),
        triplets_extracted: 0,
        kg_entries_added: 0,
        docs_penalized: 0,
        error_type: "",
    }
}

fn triplet(
    subject: &str,
    subject_type: NodeType,
    predicate: RelationType,
    object: &str,
    object_type: NodeType,
    finding: &AuditFinding,
) -> Triplet {
    Triplet {
        subject_id: subject.to_string(),
        subject_type,
        predicate,
        object_id: object.to_string(),
        object_type,
        confidence: finding.confidence,
        source_memory_id: finding.memory_id.clone(),
    }
}

fn relation_for(error_type: ErrorType) -> RelationType {
    match error_type {
        ErrorType::TechnicalInaccuracy => RelationType::IncorrectAssociation,
        ErrorType::IrrelevantResponse => RelationType::NotRelevantTo,
        ErrorType::ContradictoryInfo => RelationType::ConfusionWith,
        ErrorType::WrongRecommendation => RelationType::IncorrectSolutionFor,
        ErrorType::Hallucination => RelationType::IncorrectAssociation,
        ErrorType::DeprecatedInfo => RelationType::DeprecatedInfo,
        ErrorType::MisleadingContext => RelationType::MisleadingContext,
        ErrorType::CommonError => RelationType::CommonError,
    }
}

fn node_type_for(entity_kind: &str) -> Option<NodeType> {
    Some(match entity_kind {
        "job" => NodeType::Job,
        "job_stream" => NodeType::JobStream,
        "workstation" => NodeType::Workstation,
        "resource" => NodeType::Resource,
        "error_code" => NodeType::ErrorCode,
        "command" => NodeType::Command,
        _ => return None,
    })
}

fn response_digest(response: &str) -> String {
    let summary: String = response.chars().take(100).collect();
    let mut hasher = Sha256::new();
    hasher.update(summary.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> (AuditToKGPipeline, Arc<KnowledgeGraph>, Arc<FeedbackStore>) {
        let kg = Arc::new(KnowledgeGraph::in_memory().unwrap());
        let feedback = Arc::new(FeedbackStore::in_memory().unwrap());
        (
            AuditToKGPipeline::new(Arc::clone(&kg), Arc::clone(&feedback)),
            kg,
            feedback,
        )
    }

    fn wrong_recommendation_finding() -> AuditFinding {
        AuditFinding {
            memory_id: "mem-42".to_string(),
            query: "how do I fix job BATCH_A failing?".to_string(),
            response: "run conman against the plan to clear it".to_string(),
            is_incorrect: true,
            confidence: 0.9,
            reason: "wrong recommendation for error code AWSBIS529".to_string(),
            referenced_doc_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_wrong_recommendation_produces_expected_triplets() {
        let (pipeline, kg, _) = pipeline();
        let outcome = pipeline
            .process(&wrong_recommendation_finding())
            .await
            .unwrap();

        assert_eq!(outcome.status, "processed");
        assert_eq!(outcome.error_type, "wrong_recommendation");
        assert_eq!(outcome.triplets_extracted, 2);
        assert_eq!(outcome.kg_entries_added, 2);

        // (BATCH_A INCORRECT_SOLUTION_FOR AWSBIS529)
        let job_edges = kg.error_edges_from("BATCH_A").await;
        assert_eq!(job_edges.len(), 1);
        assert_eq!(job_edges[0].relation, RelationType::IncorrectSolutionFor);
        assert_eq!(job_edges[0].target, "AWSBIS529");
        assert_eq!(
            job_edges[0].properties["confidence"],
            serde_json::json!(0.9)
        );
        assert_eq!(
            job_edges[0].properties["error_reason"],
            serde_json::json!("wrong recommendation for error code AWSBIS529")
        );

        // (conman SHOULD_NOT_USE_FOR AWSBIS529)
        let command_edges = kg.error_edges_from("conman").await;
        assert_eq!(command_edges.len(), 1);
        assert_eq!(command_edges[0].relation, RelationType::ShouldNotUseFor);
        assert_eq!(command_edges[0].target, "AWSBIS529");
    }

    #[tokio::test]
    async fn test_error_edge_count_grows_by_triplet_count() {
        let (pipeline, kg, _) = pipeline();
        let before = kg.error_edge_count().await;
        let outcome = pipeline
            .process(&wrong_recommendation_finding())
            .await
            .unwrap();
        let after = kg.error_edge_count().await;
        assert_eq!(after - before, outcome.triplets_extracted);
    }

    #[tokio::test]
    async fn test_correct_response_skipped() {
        let (pipeline, kg, _) = pipeline();
        let mut finding = wrong_recommendation_finding();
        finding.is_incorrect = false;
        let outcome = pipeline.process(&finding).await.unwrap();
        assert_eq!(outcome.status, "skipped");
        assert_eq!(outcome.skip_reason, Some("not_incorrect"));
        assert_eq!(kg.error_edge_count().await, 0);
    }

    #[tokio::test]
    async fn test_low_confidence_skipped() {
        let (pipeline, _, _) = pipeline();
        let mut finding = wrong_recommendation_finding();
        finding.confidence = 0.5;
        let outcome = pipeline.process(&finding).await.unwrap();
        assert_eq!(outcome.skip_reason, Some("low_confidence"));
    }

    #[tokio::test]
    async fn test_technical_inaccuracy_links_job_to_workstation() {
        let (pipeline, kg, _) = pipeline();
        let finding = AuditFinding {
            memory_id: "mem-1".to_string(),
            query: "where does job NIGHTLY_ETL run?".to_string(),
            response: "it runs on workstation CPU009".to_string(),
            is_incorrect: true,
            confidence: 0.85,
            reason: "technically incorrect workstation".to_string(),
            referenced_doc_ids: Vec::new(),
        };
        pipeline.process(&finding).await.unwrap();

        let edges = kg.error_edges_from("NIGHTLY_ETL").await;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relation, RelationType::IncorrectAssociation);
        assert_eq!(edges[0].target, "CPU009");
    }

    #[tokio::test]
    async fn test_fallback_pattern_triplet_when_no_entities() {
        let (pipeline, kg, _) = pipeline();
        let finding = AuditFinding {
            memory_id: "mem-2".to_string(),
            query: "what is the best way to do things?".to_string(),
            response: "just do them".to_string(),
            is_incorrect: true,
            confidence: 0.8,
            reason: "response is irrelevant".to_string(),
            referenced_doc_ids: Vec::new(),
        };
        let outcome = pipeline.process(&finding).await.unwrap();
        assert_eq!(outcome.triplets_extracted, 1);

        let stats = kg.statistics().await;
        assert_eq!(stats.nodes_by_type["query_pattern"], 1);
        assert_eq!(stats.nodes_by_type["response_pattern"], 1);
        assert_eq!(stats.error_edge_count, 1);
    }

    #[tokio::test]
    async fn test_penalizes_referenced_docs() {
        let (pipeline, _, feedback) = pipeline();
        let mut finding = wrong_recommendation_finding();
        finding.referenced_doc_ids = vec!["doc-7".to_string(), "doc-9".to_string()];
        let outcome = pipeline.process(&finding).await.unwrap();
        assert_eq!(outcome.docs_penalized, 2);

        let recent = feedback.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|r| r.rating == -2));
        assert!(recent.iter().all(|r| r.user_id == AUDIT_USER_ID));
        assert!(recent
            .iter()
            .any(|r| r.doc_id == "doc-7" || r.doc_id == "doc-9"));
        assert_eq!(
            recent[0].metadata["is_audit_penalty"],
            serde_json::json!(true)
        );
    }

    #[tokio::test]
    async fn test_synthetic_penalties_from_entities() {
        let (pipeline, _, feedback) = pipeline();
        let outcome = pipeline
            .process(&wrong_recommendation_finding())
            .await
            .unwrap();
        assert!(outcome.docs_penalized >= 1);

        let recent = feedback.recent(10).await.unwrap();
        assert!(recent.iter().any(|r| r.doc_id.starts_with("audit:")));
        let stats = feedback.stats().await.unwrap();
        assert_eq!(stats.audit_rows as usize, outcome.docs_penalized);
    }

    struct FixedExtractor {
        triplets: Vec<Triplet>,
    }

    #[async_trait::async_trait]
    impl TripletExtractor for FixedExtractor {
        async fn extract(&self, _q: &str, _r: &str, _reason: &str) -> Result<Vec<Triplet>> {
            Ok(self.triplets.clone())
        }
    }

    struct BrokenExtractor;

    #[async_trait::async_trait]
    impl TripletExtractor for BrokenExtractor {
        async fn extract(&self, _q: &str, _r: &str, _reason: &str) -> Result<Vec<Triplet>> {
            Err(sentra_core::Error::Transient("llm timeout".to_string()))
        }
    }

    fn extractor_triplet(predicate: RelationType) -> Triplet {
        Triplet {
            subject_id: "X1".to_string(),
            subject_type: NodeType::Concept,
            predicate,
            object_id: "Y1".to_string(),
            object_type: NodeType::Concept,
            confidence: 1.0,
            source_memory_id: String::new(),
        }
    }

    #[tokio::test]
    async fn test_extractor_triplets_discounted_and_capped() {
        let kg = Arc::new(KnowledgeGraph::in_memory().unwrap());
        let feedback = Arc::new(FeedbackStore::in_memory().unwrap());
        let extractor = FixedExtractor {
            triplets: vec![
                extractor_triplet(RelationType::IncorrectAssociation),
                extractor_triplet(RelationType::ConfusionWith),
                extractor_triplet(RelationType::DeprecatedInfo),
                extractor_triplet(RelationType::CommonError),
                // Positive predicate: must be dropped
                extractor_triplet(RelationType::DependsOn),
            ],
        };
        let pipeline = AuditToKGPipeline::new(Arc::clone(&kg), feedback)
            .with_extractor(Arc::new(extractor));

        let outcome = pipeline
            .process(&wrong_recommendation_finding())
            .await
            .unwrap();
        // 2 rule triplets + 3 capped extractor triplets
        assert_eq!(outcome.triplets_extracted, 5);

        let edges = kg.error_edges_from("X1").await;
        assert!(!edges.is_empty());
        // Discounted: 1.0 * 0.8
        assert_eq!(edges[0].properties["confidence"], serde_json::json!(0.8));
        // And no positive edge was written anywhere
        assert_eq!(kg.statistics().await.edge_count, kg.error_edge_count().await);
    }

    #[tokio::test]
    async fn test_broken_extractor_degrades_gracefully() {
        let kg = Arc::new(KnowledgeGraph::in_memory().unwrap());
        let feedback = Arc::new(FeedbackStore::in_memory().unwrap());
        let pipeline =
            AuditToKGPipeline::new(kg, feedback).with_extractor(Arc::new(BrokenExtractor));

        let outcome = pipeline
            .process(&wrong_recommendation_finding())
            .await
            .unwrap();
        assert_eq!(outcome.status, "processed");
        assert_eq!(outcome.triplets_extracted, 2);
    }

    #[tokio::test]
    async fn test_records_error_patterns_in_review_queue() {
        let kg = Arc::new(KnowledgeGraph::in_memory().unwrap());
        let feedback = Arc::new(FeedbackStore::in_memory().unwrap());
        let queue = Arc::new(ActiveLearningQueue::in_memory(7).unwrap());
        let pipeline = AuditToKGPipeline::new(kg, feedback)
            .with_review_queue(Arc::clone(&queue));

        pipeline
            .process(&wrong_recommendation_finding())
            .await
            .unwrap();

        // The reason's error code was recorded; a query about it now trips
        // the past-error probe
        let decision = queue
            .evaluate(
                "what about AWSBIS529 on job OTHER_J?",
                "response",
                &crate::review::ReviewSignals {
                    classification_confidence: 0.95,
                    rag_similarity: 0.95,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(decision
            .reasons
            .contains(&crate::review::ReviewReason::SimilarToPastError));
    }

    #[tokio::test]
    async fn test_should_warn_about_query() {
        let (pipeline, _, _) = pipeline();
        assert!(!pipeline.should_warn_about_query("job BATCH_A status").await);
        pipeline
            .process(&wrong_recommendation_finding())
            .await
            .unwrap();
        assert!(pipeline.should_warn_about_query("restart job BATCH_A").await);
        assert!(
            !pipeline
                .should_warn_about_query("restart job CLEAN_JOB")
                .await
        );
    }
}
