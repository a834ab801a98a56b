//! Active-learning review queue
//!
//! Decides whether a query/response pair deserves human review, manages
//! the review queue, and tracks how novel each query pattern is. The
//! decision rules:
//!
//! | reason | trigger |
//! |---|---|
//! | low classification confidence | confidence < 0.6 |
//! | low RAG relevance | top similarity < 0.7 |
//! | no entities found | fewer than 1 extracted entity |
//! | similar to past error | pattern matches a recorded audit error |
//! | novel query pattern | seen < 3 times and confidence < 0.8 |
//!
//! Two or more reasons enqueue the item; a past-error match enqueues on
//! its own. A single lesser reason only produces a warning string.

use crate::patterns::{query_fingerprint, PatternTable};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::Connection;
use sentra_core::{now_epoch, Error, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Classification confidence below this triggers a reason
pub const CLASSIFICATION_CONFIDENCE_THRESHOLD: f64 = 0.6;
/// Top RAG similarity below this triggers a reason
pub const RAG_SIMILARITY_THRESHOLD: f64 = 0.7;
/// Minimum extracted entities for confidence
pub const MIN_ENTITIES_FOR_CONFIDENCE: usize = 1;
/// Patterns seen fewer times than this count as novel
const NOVEL_PATTERN_MAX_OCCURRENCES: i64 = 3;
/// Novel patterns only matter when confidence is below this
const NOVEL_PATTERN_CONFIDENCE_GATE: f64 = 0.8;

static ERROR_CODE_PROBE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(AWSB[A-Z0-9]+|ERR[_-]?[0-9]+)\b").expect("static regex"));

/// Why an item was flagged for review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewReason {
    /// Classifier was unsure about the intent
    LowClassificationConfidence,
    /// Best retrieval hit was weakly similar
    LowRagRelevance,
    /// No entities could be extracted from the query
    NoEntitiesFound,
    /// The query matches a recorded audit error pattern
    SimilarToPastError,
    /// The classifier saw several plausible intents
    MultiplePossibleIntents,
    /// The query pattern is new or nearly new
    NovelQueryPattern,
    /// Retrieved sources disagree with each other
    ConflictingSources,
    /// A human asked for review explicitly
    UserRequested,
}

impl ReviewReason {
    /// Stable snake_case name used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewReason::LowClassificationConfidence => "low_classification_confidence",
            ReviewReason::LowRagRelevance => "low_rag_relevance",
            ReviewReason::NoEntitiesFound => "no_entities_found",
            ReviewReason::SimilarToPastError => "similar_to_past_error",
            ReviewReason::MultiplePossibleIntents => "multiple_possible_intents",
            ReviewReason::NovelQueryPattern => "novel_query_pattern",
            ReviewReason::ConflictingSources => "conflicting_sources",
            ReviewReason::UserRequested => "user_requested",
        }
    }

    /// Parse the stable name
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "low_classification_confidence" => ReviewReason::LowClassificationConfidence,
            "low_rag_relevance" => ReviewReason::LowRagRelevance,
            "no_entities_found" => ReviewReason::NoEntitiesFound,
            "similar_to_past_error" => ReviewReason::SimilarToPastError,
            "multiple_possible_intents" => ReviewReason::MultiplePossibleIntents,
            "novel_query_pattern" => ReviewReason::NovelQueryPattern,
            "conflicting_sources" => ReviewReason::ConflictingSources,
            "user_requested" => ReviewReason::UserRequested,
            _ => return None,
        })
    }
}

/// Lifecycle status of a review item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    /// Waiting for a reviewer
    Pending,
    /// A reviewer has picked it up
    InProgress,
    /// Response approved as-is
    Approved,
    /// Response corrected; the correction is a learning outcome
    Corrected,
    /// Response rejected without a correction
    Rejected,
    /// Aged out of the queue unreviewed
    Expired,
}

impl ReviewStatus {
    /// Stable snake_case name used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::InProgress => "in_progress",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Corrected => "corrected",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Expired => "expired",
        }
    }

    /// Parse the stable name
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "pending" => ReviewStatus::Pending,
            "in_progress" => ReviewStatus::InProgress,
            "approved" => ReviewStatus::Approved,
            "corrected" => ReviewStatus::Corrected,
            "rejected" => ReviewStatus::Rejected,
            "expired" => ReviewStatus::Expired,
            _ => return None,
        })
    }
}

/// One queued item awaiting (or past) review
#[derive(Debug, Clone)]
pub struct ReviewItem {
    /// Item id
    pub id: String,
    /// Original query
    pub query: String,
    /// Proposed response
    pub response: String,
    /// Why it was flagged
    pub reasons: Vec<ReviewReason>,
    /// Named confidence signals at decision time
    pub confidence_scores: BTreeMap<String, f64>,
    /// Current status
    pub status: ReviewStatus,
    /// Creation time, epoch seconds
    pub created_at: f64,
    /// Review time, if reviewed
    pub reviewed_at: Option<f64>,
    /// Reviewer id, if reviewed
    pub reviewed_by: Option<String>,
    /// Corrected response, if corrected
    pub correction: Option<String>,
    /// Free-text reviewer feedback
    pub feedback: Option<String>,
}

/// What the caller should do with the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestedAction {
    /// Enqueue for human review before surfacing
    SendToReviewQueue,
    /// Surface with a low-confidence disclaimer
    AddDisclaimer,
    /// Surface normally
    ProceedNormally,
}

/// Decision returned by [`ActiveLearningQueue::evaluate`]
#[derive(Debug, Clone)]
pub struct ReviewDecision {
    /// Whether the item was enqueued for review
    pub should_review: bool,
    /// Reasons that applied
    pub reasons: Vec<ReviewReason>,
    /// Signals at decision time
    pub confidence_scores: BTreeMap<String, f64>,
    /// Suggested handling
    pub suggested_action: SuggestedAction,
    /// Warning text when reasons applied without enqueueing
    pub warning: Option<String>,
    /// Id of the enqueued item, when enqueued
    pub review_id: Option<String>,
}

/// Confidence signals handed to [`ActiveLearningQueue::evaluate`]
#[derive(Debug, Clone, Default)]
pub struct ReviewSignals {
    /// Intent-classifier confidence in [0, 1]
    pub classification_confidence: f64,
    /// Best retrieval similarity in [0, 1]
    pub rag_similarity: f64,
    /// Entities already extracted upstream, by kind
    pub entities_found: BTreeMap<String, Vec<String>>,
    /// Additional named signals to carry along
    pub additional: BTreeMap<String, f64>,
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct ReviewQueueStats {
    /// Item counts by status name
    pub by_status: BTreeMap<String, u64>,
    /// Pending item counts by reason name
    pub pending_by_reason: BTreeMap<String, u64>,
    /// Mean minutes from enqueue to review, over reviewed items
    pub avg_review_time_minutes: f64,
    /// Corrections recorded as learning outcomes
    pub corrections_recorded: u64,
    /// Items in any non-pending status
    pub total_reviewed: u64,
}

/// Uncertainty detection, review queue, and pattern novelty tracking
pub struct ActiveLearningQueue {
    conn: Mutex<Connection>,
    patterns: &'static PatternTable,
    /// Audit error patterns (query fingerprints and error codes) consulted
    /// by the past-error probe
    error_patterns: Mutex<HashSet<String>>,
    max_age_days: u64,
}

impl ActiveLearningQueue {
    /// Open (or create) the queue under `dir/reviews.db`
    pub fn open(dir: &Path, max_age_days: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join("reviews.db"))
            .map_err(|e| Error::Store(format!("open review queue: {e}")))?;
        Self::build(conn, max_age_days)
    }

    /// In-memory queue for tests and ephemeral runs
    pub fn in_memory(max_age_days: u64) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("open review queue: {e}")))?;
        Self::build(conn, max_age_days)
    }

    fn build(conn: Connection, max_age_days: u64) -> Result<Self> {
        let queue = ActiveLearningQueue {
            conn: Mutex::new(conn),
            patterns: PatternTable::default_table(),
            error_patterns: Mutex::new(HashSet::new()),
            max_age_days,
        };
        queue.init_schema()?;
        info!(max_age_days, "active learning queue initialized");
        Ok(queue)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS review_queue (
                id TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                response TEXT NOT NULL,
                reasons TEXT NOT NULL,
                confidence_scores TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at REAL NOT NULL,
                reviewed_at REAL,
                reviewed_by TEXT,
                correction TEXT,
                feedback TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_review_status ON review_queue(status);
            CREATE INDEX IF NOT EXISTS idx_review_created
                ON review_queue(created_at DESC);

            CREATE TABLE IF NOT EXISTS query_patterns (
                pattern_hash TEXT PRIMARY KEY,
                pattern_text TEXT NOT NULL,
                first_seen REAL NOT NULL,
                last_seen REAL NOT NULL,
                occurrence_count INTEGER NOT NULL DEFAULT 1,
                avg_confidence REAL NOT NULL DEFAULT 0.0
            );

            CREATE TABLE IF NOT EXISTS learning_outcomes (
                id TEXT PRIMARY KEY,
                review_id TEXT NOT NULL REFERENCES review_queue(id),
                original_response TEXT NOT NULL,
                corrected_response TEXT,
                recorded_at REAL NOT NULL
            );",
        )
        .map_err(store_err)?;
        Ok(())
    }

    // ========================================================================
    // Decision
    // ========================================================================

    /// Evaluate a query/response pair and enqueue it when warranted
    pub async fn evaluate(
        &self,
        query: &str,
        response: &str,
        signals: &ReviewSignals,
    ) -> Result<ReviewDecision> {
        let mut reasons = Vec::new();
        let mut confidence_scores = BTreeMap::new();
        confidence_scores.insert(
            "classification".to_string(),
            signals.classification_confidence,
        );
        confidence_scores.insert("rag_similarity".to_string(), signals.rag_similarity);
        confidence_scores.extend(signals.additional.clone());

        if signals.classification_confidence < CLASSIFICATION_CONFIDENCE_THRESHOLD {
            reasons.push(ReviewReason::LowClassificationConfidence);
        }
        if signals.rag_similarity < RAG_SIMILARITY_THRESHOLD {
            reasons.push(ReviewReason::LowRagRelevance);
        }

        let entities = if signals.entities_found.is_empty() {
            self.patterns.extract_entities(query)
        } else {
            signals.entities_found.clone()
        };
        if PatternTable::count_entities(&entities) < MIN_ENTITIES_FOR_CONFIDENCE {
            reasons.push(ReviewReason::NoEntitiesFound);
        }

        if self.is_similar_to_past_error(query) {
            reasons.push(ReviewReason::SimilarToPastError);
        }

        if self.is_novel_pattern(query)?
            && signals.classification_confidence < NOVEL_PATTERN_CONFIDENCE_GATE
        {
            reasons.push(ReviewReason::NovelQueryPattern);
        }

        self.update_pattern(query, signals.classification_confidence)?;

        let should_review =
            reasons.len() >= 2 || reasons.contains(&ReviewReason::SimilarToPastError);

        let warning = if !reasons.is_empty() && !should_review {
            Some(format!(
                "low confidence signals: {}",
                reasons
                    .iter()
                    .map(|r| r.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        } else {
            None
        };

        let suggested_action = if should_review {
            SuggestedAction::SendToReviewQueue
        } else if !reasons.is_empty() {
            SuggestedAction::AddDisclaimer
        } else {
            SuggestedAction::ProceedNormally
        };

        let review_id = if should_review {
            let id = self
                .enqueue(query, response, &reasons, &confidence_scores)
                .await?;
            info!(
                review_id = %id,
                reasons = ?reasons.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
                "review requested"
            );
            Some(id)
        } else {
            None
        };

        Ok(ReviewDecision {
            should_review,
            reasons,
            confidence_scores,
            suggested_action,
            warning,
            review_id,
        })
    }

    /// Register an audit error pattern for the past-error probe
    ///
    /// Accepts query fingerprints and literal error codes; the audit
    /// pipeline feeds this after every processed finding.
    pub fn record_error_pattern(&self, pattern: impl Into<String>) {
        self.error_patterns.lock().insert(pattern.into());
    }

    fn is_similar_to_past_error(&self, query: &str) -> bool {
        let patterns = self.error_patterns.lock();
        if patterns.is_empty() {
            return false;
        }
        if patterns.contains(&query_fingerprint(query)) {
            return true;
        }
        ERROR_CODE_PROBE
            .captures_iter(query)
            .any(|c| patterns.contains(&c[1].to_uppercase()))
    }

    fn is_novel_pattern(&self, query: &str) -> Result<bool> {
        let hash = query_fingerprint(query);
        let conn = self.conn.lock();
        let count: Option<i64> = conn
            .query_row(
                "SELECT occurrence_count FROM query_patterns WHERE pattern_hash = ?1",
                [&hash],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(store_err(other)),
            })?;
        Ok(count.map_or(true, |c| c < NOVEL_PATTERN_MAX_OCCURRENCES))
    }

    fn update_pattern(&self, query: &str, confidence: f64) -> Result<()> {
        let hash = query_fingerprint(query);
        let now = now_epoch();
        let pattern_text: String = query.chars().take(200).collect();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO query_patterns
                 (pattern_hash, pattern_text, first_seen, last_seen,
                  occurrence_count, avg_confidence)
             VALUES (?1, ?2, ?3, ?3, 1, ?4)
             ON CONFLICT(pattern_hash) DO UPDATE SET
                 occurrence_count = occurrence_count + 1,
                 avg_confidence = (avg_confidence * occurrence_count + ?4)
                                  / (occurrence_count + 1),
                 last_seen = ?3",
            rusqlite::params![hash, pattern_text, now, confidence],
        )
        .map_err(store_err)?;
        Ok(())
    }

    // ========================================================================
    // Queue operations
    // ========================================================================

    /// Add an item to the review queue; returns its id
    pub async fn enqueue(
        &self,
        query: &str,
        response: &str,
        reasons: &[ReviewReason],
        confidence_scores: &BTreeMap<String, f64>,
    ) -> Result<String> {
        let created_at = now_epoch();
        let id = {
            let mut hasher = Sha256::new();
            hasher.update(format!("{query}:{created_at}"));
            hex::encode(hasher.finalize())[..16].to_string()
        };
        let reasons_text = serde_json::to_string(
            &reasons.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        )?;
        let scores_text = serde_json::to_string(confidence_scores)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO review_queue
                 (id, query, response, reasons, confidence_scores, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            rusqlite::params![id, query, response, reasons_text, scores_text, created_at],
        )
        .map_err(store_err)?;
        debug!(review_id = %id, "added to review queue");
        Ok(id)
    }

    /// Pending items, oldest first, optionally filtered by reason
    pub async fn pending(
        &self,
        limit: usize,
        reason_filter: Option<ReviewReason>,
    ) -> Result<Vec<ReviewItem>> {
        let conn = self.conn.lock();
        let base_sql = "SELECT id, query, response, reasons, confidence_scores, status,
                               created_at, reviewed_at, reviewed_by, correction, feedback
                        FROM review_queue WHERE status = 'pending'";

        let mut items = Vec::new();
        let mut push_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
            let reasons_text: String = row.get(3)?;
            let reasons: Vec<ReviewReason> = serde_json::from_str::<Vec<String>>(&reasons_text)
                .unwrap_or_default()
                .iter()
                .filter_map(|name| ReviewReason::from_name(name))
                .collect();
            let scores_text: String = row.get(4)?;
            let status_text: String = row.get(5)?;
            items.push(ReviewItem {
                id: row.get(0)?,
                query: row.get(1)?,
                response: row.get(2)?,
                reasons,
                confidence_scores: serde_json::from_str(&scores_text).unwrap_or_default(),
                status: ReviewStatus::from_name(&status_text).unwrap_or(ReviewStatus::Pending),
                created_at: row.get(6)?,
                reviewed_at: row.get(7)?,
                reviewed_by: row.get(8)?,
                correction: row.get(9)?,
                feedback: row.get(10)?,
            });
            Ok(())
        };

        match reason_filter {
            Some(reason) => {
                let sql = format!(
                    "{base_sql} AND reasons LIKE ?1 ORDER BY created_at ASC LIMIT ?2"
                );
                let mut statement = conn.prepare(&sql).map_err(store_err)?;
                let pattern = format!("%{}%", reason.as_str());
                let mut rows = statement
                    .query(rusqlite::params![pattern, limit as i64])
                    .map_err(store_err)?;
                while let Some(row) = rows.next().map_err(store_err)? {
                    push_row(row).map_err(store_err)?;
                }
            }
            None => {
                let sql = format!("{base_sql} ORDER BY created_at ASC LIMIT ?1");
                let mut statement = conn.prepare(&sql).map_err(store_err)?;
                let mut rows = statement
                    .query([limit as i64])
                    .map_err(store_err)?;
                while let Some(row) = rows.next().map_err(store_err)? {
                    push_row(row).map_err(store_err)?;
                }
            }
        }
        Ok(items)
    }

    /// Submit a human review for a queued item
    ///
    /// A corrected submission also records a learning outcome. Returns
    /// false if the item id is unknown.
    pub async fn submit_review(
        &self,
        review_id: &str,
        status: ReviewStatus,
        reviewer_id: &str,
        correction: Option<&str>,
        feedback: Option<&str>,
    ) -> Result<bool> {
        let now = now_epoch();
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE review_queue
                 SET status = ?1, reviewed_at = ?2, reviewed_by = ?3,
                     correction = ?4, feedback = ?5
                 WHERE id = ?6",
                rusqlite::params![
                    status.as_str(),
                    now,
                    reviewer_id,
                    correction,
                    feedback,
                    review_id
                ],
            )
            .map_err(store_err)?;
        if updated == 0 {
            return Ok(false);
        }

        if status == ReviewStatus::Corrected {
            if let Some(correction) = correction {
                let original: String = conn
                    .query_row(
                        "SELECT response FROM review_queue WHERE id = ?1",
                        [review_id],
                        |row| row.get(0),
                    )
                    .map_err(store_err)?;
                let outcome_id = {
                    let mut hasher = Sha256::new();
                    hasher.update(format!("{review_id}:{now}"));
                    hex::encode(hasher.finalize())[..16].to_string()
                };
                conn.execute(
                    "INSERT INTO learning_outcomes
                         (id, review_id, original_response, corrected_response, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![outcome_id, review_id, original, correction, now],
                )
                .map_err(store_err)?;
            }
        }

        info!(
            review_id,
            status = status.as_str(),
            has_correction = correction.is_some(),
            "review submitted"
        );
        Ok(true)
    }

    /// Queue statistics
    pub async fn stats(&self) -> Result<ReviewQueueStats> {
        let conn = self.conn.lock();

        let mut by_status = BTreeMap::new();
        {
            let mut statement = conn
                .prepare("SELECT status, COUNT(*) FROM review_queue GROUP BY status")
                .map_err(store_err)?;
            let mut rows = statement.query([]).map_err(store_err)?;
            while let Some(row) = rows.next().map_err(store_err)? {
                by_status.insert(
                    row.get::<_, String>(0).map_err(store_err)?,
                    row.get::<_, u64>(1).map_err(store_err)?,
                );
            }
        }

        let mut pending_by_reason: BTreeMap<String, u64> = BTreeMap::new();
        {
            let mut statement = conn
                .prepare("SELECT reasons FROM review_queue WHERE status = 'pending'")
                .map_err(store_err)?;
            let mut rows = statement.query([]).map_err(store_err)?;
            while let Some(row) = rows.next().map_err(store_err)? {
                let text: String = row.get(0).map_err(store_err)?;
                for name in serde_json::from_str::<Vec<String>>(&text).unwrap_or_default() {
                    *pending_by_reason.entry(name).or_insert(0) += 1;
                }
            }
        }

        let avg_review_time_minutes: f64 = conn
            .query_row(
                "SELECT COALESCE(AVG((reviewed_at - created_at) / 60.0), 0)
                 FROM review_queue WHERE reviewed_at IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .map_err(store_err)?;

        let corrections_recorded: u64 = conn
            .query_row("SELECT COUNT(*) FROM learning_outcomes", [], |row| {
                row.get(0)
            })
            .map_err(store_err)?;

        let total_reviewed = by_status
            .iter()
            .filter(|(status, _)| status.as_str() != "pending")
            .map(|(_, count)| count)
            .sum();

        Ok(ReviewQueueStats {
            by_status,
            pending_by_reason,
            avg_review_time_minutes,
            corrections_recorded,
            total_reviewed,
        })
    }

    /// Mark pending items older than the configured age as expired
    pub async fn expire_old(&self) -> Result<usize> {
        let cutoff = now_epoch() - self.max_age_days as f64 * 86_400.0;
        let conn = self.conn.lock();
        let expired = conn
            .execute(
                "UPDATE review_queue SET status = 'expired'
                 WHERE status = 'pending' AND created_at < ?1",
                [cutoff],
            )
            .map_err(store_err)?;
        if expired > 0 {
            info!(count = expired, "reviews expired");
        }
        Ok(expired)
    }

    /// Occurrence count for a query's pattern, if ever seen
    pub fn pattern_occurrences(&self, query: &str) -> Result<Option<i64>> {
        let hash = query_fingerprint(query);
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT occurrence_count FROM query_patterns WHERE pattern_hash = ?1",
            [&hash],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(store_err(other)),
        })
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}
