//! Feedback-aware retrieval reranking
//!
//! Wraps any base retriever and folds historical feedback into its scores:
//! documents with positive feedback for similar queries rise, documents
//! with negative feedback sink. With feedback disabled or the weight at
//! zero, retrieval is strictly equivalent to the base retriever.

use crate::feedback_store::FeedbackStore;
use parking_lot::Mutex;
use sentra_core::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Overfetch cap: at most this many candidates are pulled for reranking
const MAX_FETCH_K: usize = 50;

/// One retrieved document with its (possibly adjusted) score
#[derive(Debug, Clone)]
pub struct RetrievedDoc {
    /// Document id
    pub doc_id: String,
    /// Current score (adjusted when feedback was applied)
    pub score: f64,
    /// Score before feedback adjustment, when one was applied
    pub original_score: Option<f64>,
    /// The adjustment in [-0.5, +0.5] that was applied, if any
    pub feedback_adjustment: Option<f64>,
    /// Arbitrary payload carried through from the base retriever
    pub payload: serde_json::Value,
}

impl RetrievedDoc {
    /// A bare document with a score and no payload
    pub fn new(doc_id: impl Into<String>, score: f64) -> Self {
        RetrievedDoc {
            doc_id: doc_id.into(),
            score,
            original_score: None,
            feedback_adjustment: None,
            payload: serde_json::Value::Null,
        }
    }
}

/// Base retrieval seam
///
/// Any document source with scored results can sit behind the reranker:
/// the vector store, a hybrid searcher, or a test stub.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Fetch up to `top_k` scored candidates for a query
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&serde_json::Value>,
    ) -> Result<Vec<RetrievedDoc>>;
}

/// Statistics for the reranking wrapper
#[derive(Debug, Clone)]
pub struct RetrieverStats {
    /// Whether feedback adjustment is enabled
    pub feedback_enabled: bool,
    /// Configured feedback weight in [0, 1]
    pub feedback_weight: f64,
    /// Total feedback rows behind the adjustments
    pub feedback_rows: u64,
}

/// Retriever wrapper that reranks with historical feedback
pub struct FeedbackAwareRetriever {
    base: Arc<dyn Retriever>,
    store: Arc<FeedbackStore>,
    weight: f64,
    enabled: bool,
    /// Last returned window, so later feedback can name a document by index
    last_window: Mutex<Option<(String, Vec<RetrievedDoc>)>>,
}

impl FeedbackAwareRetriever {
    /// Wrap a base retriever; the weight is clamped into [0, 1]
    pub fn new(
        base: Arc<dyn Retriever>,
        store: Arc<FeedbackStore>,
        weight: f64,
        enabled: bool,
    ) -> Self {
        FeedbackAwareRetriever {
            base,
            store,
            weight: weight.clamp(0.0, 1.0),
            enabled,
            last_window: Mutex::new(None),
        }
    }

    /// Retrieve with feedback-adjusted ranking
    ///
    /// Overfetches up to `2 * top_k` (capped at 50) candidates, applies
    /// `new_score = base_score * (1 + adjustment * weight)`, resorts, and
    /// returns the top k. The returned window is cached so
    /// [`record_feedback`](Self::record_feedback) can resolve an index.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&serde_json::Value>,
    ) -> Result<Vec<RetrievedDoc>> {
        let apply = self.enabled && self.weight > 0.0;
        let fetch_k = if apply {
            (top_k * 2).min(MAX_FETCH_K)
        } else {
            top_k
        };

        let mut results = self.base.retrieve(query, fetch_k, filters).await?;
        if results.is_empty() {
            *self.last_window.lock() = Some((query.to_string(), Vec::new()));
            return Ok(results);
        }

        if apply {
            let doc_ids: Vec<String> = results.iter().map(|d| d.doc_id.clone()).collect();
            // Feedback lookup failure degrades to base ordering
            match self.store.get_scores(query, &doc_ids).await {
                Ok(adjustments) => {
                    let mut adjusted = 0usize;
                    for doc in &mut results {
                        let adjustment = adjustments.get(&doc.doc_id).copied().unwrap_or(0.0);
                        doc.original_score = Some(doc.score);
                        doc.feedback_adjustment = Some(adjustment);
                        doc.score *= 1.0 + adjustment * self.weight;
                        if adjustment.abs() > 0.1 {
                            adjusted += 1;
                        }
                    }
                    results.sort_by(|a, b| {
                        b.score
                            .partial_cmp(&a.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    if adjusted > 0 {
                        info!(
                            total = results.len(),
                            adjusted, "feedback reranking applied"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, "feedback lookup failed, returning base ranking");
                }
            }
        }

        results.truncate(top_k);
        *self.last_window.lock() = Some((query.to_string(), results.clone()));
        debug!(
            query_len = query.len(),
            results = results.len(),
            feedback_applied = apply,
            "retrieve complete"
        );
        Ok(results)
    }

    /// Record feedback against a document from the last result window
    ///
    /// The document is named by explicit id or by index into the last
    /// window (defaulting to the first result). Returns the feedback row
    /// id, or None when there is nothing to record against.
    pub async fn record_feedback(
        &self,
        rating: i64,
        doc_index: Option<usize>,
        doc_id: Option<&str>,
        response: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Option<String>> {
        let (query, resolved) = {
            let window = self.last_window.lock();
            let (query, docs) = match window.as_ref() {
                Some(w) => w,
                None => {
                    warn!("no query window to record feedback against");
                    return Ok(None);
                }
            };
            let resolved = match doc_id {
                Some(id) => Some(id.to_string()),
                None => docs
                    .get(doc_index.unwrap_or(0))
                    .map(|d| d.doc_id.clone()),
            };
            (query.clone(), resolved)
        };

        let doc_id = match resolved {
            Some(id) => id,
            None => {
                warn!("no document to record feedback against");
                return Ok(None);
            }
        };

        let id = self
            .store
            .record(&query, &doc_id, rating, user_id, response, None)
            .await?;
        Ok(Some(id))
    }

    /// Wrapper statistics
    pub async fn stats(&self) -> Result<RetrieverStats> {
        let store_stats = self.store.stats().await?;
        Ok(RetrieverStats {
            feedback_enabled: self.enabled,
            feedback_weight: self.weight,
            feedback_rows: store_stats.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-score base retriever for tests
    struct FixedRetriever {
        docs: Vec<(String, f64)>,
    }

    #[async_trait::async_trait]
    impl Retriever for FixedRetriever {
        async fn retrieve(
            &self,
            _query: &str,
            top_k: usize,
            _filters: Option<&serde_json::Value>,
        ) -> Result<Vec<RetrievedDoc>> {
            Ok(self
                .docs
                .iter()
                .take(top_k)
                .map(|(id, score)| RetrievedDoc::new(id.clone(), *score))
                .collect())
        }
    }

    fn base() -> Arc<dyn Retriever> {
        Arc::new(FixedRetriever {
            docs: vec![
                ("d1".to_string(), 0.9),
                ("d2".to_string(), 0.7),
                ("d3".to_string(), 0.6),
            ],
        })
    }

    #[tokio::test]
    async fn test_zero_weight_is_passthrough() {
        let store = Arc::new(FeedbackStore::in_memory().unwrap());
        // Even strong negative feedback must not matter at weight zero
        store
            .record("q", "d1", -2, Some("u"), None, None)
            .await
            .unwrap();

        let retriever = FeedbackAwareRetriever::new(base(), store, 0.0, true);
        let results = retriever.retrieve("q", 3, None).await.unwrap();
        let order: Vec<&str> = results.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(order, vec!["d1", "d2", "d3"]);
        assert!((results[0].score - 0.9).abs() < f64::EPSILON);
        assert!(results[0].feedback_adjustment.is_none());
    }

    #[tokio::test]
    async fn test_disabled_is_passthrough() {
        let store = Arc::new(FeedbackStore::in_memory().unwrap());
        store
            .record("q", "d1", -2, Some("u"), None, None)
            .await
            .unwrap();
        let retriever = FeedbackAwareRetriever::new(base(), store, 0.5, false);
        let results = retriever.retrieve("q", 3, None).await.unwrap();
        let order: Vec<&str> = results.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(order, vec!["d1", "d2", "d3"]);
    }

    #[tokio::test]
    async fn test_feedback_reorders_results() {
        let store = Arc::new(FeedbackStore::in_memory().unwrap());
        // Push d1 down hard and d2 up hard for this query shape
        for user in ["u1", "u2", "u3"] {
            store
                .record("find the log", "d1", -2, Some(user), None, None)
                .await
                .unwrap();
            store
                .record("find the log", "d2", 2, Some(user), None, None)
                .await
                .unwrap();
        }

        let retriever = FeedbackAwareRetriever::new(base(), store, 0.5, true);
        let results = retriever.retrieve("find the log", 3, None).await.unwrap();
        let order: Vec<&str> = results.iter().map(|d| d.doc_id.as_str()).collect();

        // d1: 0.9 * (1 - 0.5*0.5) = 0.675; d2: 0.7 * (1 + 0.5*0.5) = 0.875
        assert_eq!(order, vec!["d2", "d1", "d3"]);
        assert!(results[0].original_score.is_some());
        assert!(results[1].feedback_adjustment.unwrap() < 0.0);
        assert!((results[2].score - 0.6).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_record_feedback_by_index() {
        let store = Arc::new(FeedbackStore::in_memory().unwrap());
        let retriever = FeedbackAwareRetriever::new(base(), Arc::clone(&store), 0.5, true);

        retriever.retrieve("some query", 3, None).await.unwrap();
        let id = retriever
            .record_feedback(2, Some(1), None, None, Some("alice"))
            .await
            .unwrap();
        assert!(id.is_some());

        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent[0].doc_id, "d2");
        assert_eq!(recent[0].rating, 2);
        assert_eq!(recent[0].user_id, "alice");
        assert_eq!(recent[0].query, "some query");
    }

    #[tokio::test]
    async fn test_record_feedback_without_window() {
        let store = Arc::new(FeedbackStore::in_memory().unwrap());
        let retriever = FeedbackAwareRetriever::new(base(), store, 0.5, true);
        let id = retriever
            .record_feedback(1, None, None, None, None)
            .await
            .unwrap();
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn test_stats_surface() {
        let store = Arc::new(FeedbackStore::in_memory().unwrap());
        let retriever = FeedbackAwareRetriever::new(base(), store, 0.3, true);
        let stats = retriever.stats().await.unwrap();
        assert!(stats.feedback_enabled);
        assert!((stats.feedback_weight - 0.3).abs() < f64::EPSILON);
        assert_eq!(stats.feedback_rows, 0);
    }
}
