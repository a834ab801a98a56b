//! Persisted per-(query, document) feedback with score aggregation
//!
//! Every rating lands as one row keyed by (query fingerprint, document id,
//! user id, timestamp). Aggregation turns rows into a signed adjustment in
//! [-0.5, +0.5] per document:
//!
//! - ratings normalize from the [-2, +2] scale to [-1, +1]
//! - a linear decay weights rows down to zero over a 30-day window
//! - rows whose fingerprint matches the query weigh 1.0; global rows for
//!   the same document weigh 0.4
//! - the weighted mean is halved and clamped to the +/-0.5 band
//!
//! A user id prefixed `system:` marks auditor-produced rows; they age out
//! of scoring with everything else but are counted separately in stats.

use crate::patterns::query_fingerprint;
use parking_lot::Mutex;
use rusqlite::Connection;
use sentra_core::{now_epoch, Error, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Feedback decays linearly to zero over this window
const DECAY_WINDOW_SECS: f64 = 30.0 * 86_400.0;

/// Weight of rows whose query fingerprint matches the scored query
const QUERY_SPECIFIC_WEIGHT: f64 = 1.0;

/// Weight of rows recorded against the same document for other queries
const GLOBAL_WEIGHT: f64 = 0.4;

/// Rating bounds (inclusive)
const MIN_RATING: i64 = -2;
const MAX_RATING: i64 = 2;

/// User-id prefix marking auditor-produced feedback
pub const SYSTEM_USER_PREFIX: &str = "system:";

/// One stored feedback row
#[derive(Debug, Clone)]
pub struct FeedbackRecord {
    /// Row id
    pub id: String,
    /// Original query text
    pub query: String,
    /// Structural fingerprint of the query
    pub query_fingerprint: String,
    /// Rated document id
    pub doc_id: String,
    /// Rating in [-2, +2]
    pub rating: i64,
    /// User who rated, or a `system:` id
    pub user_id: String,
    /// Generated response the rating refers to
    pub response: Option<String>,
    /// Free-form metadata
    pub metadata: serde_json::Value,
    /// Creation time, epoch seconds
    pub created_at: f64,
}

/// Aggregate counters over the store
#[derive(Debug, Clone)]
pub struct FeedbackStats {
    /// Total rows
    pub total: u64,
    /// Rows with rating > 0
    pub positive: u64,
    /// Rows with rating < 0
    pub negative: u64,
    /// Rows recorded by `system:` users (audit penalties)
    pub audit_rows: u64,
    /// positive / total
    pub positive_rate: f64,
}

/// Durable feedback store over sqlite
pub struct FeedbackStore {
    conn: Mutex<Connection>,
}

impl FeedbackStore {
    /// Open (or create) the store under `dir/feedback.db`
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join("feedback.db"))
            .map_err(|e| Error::Store(format!("open feedback store: {e}")))?;
        let store = FeedbackStore {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!(dir = %dir.display(), "feedback store opened");
        Ok(store)
    }

    /// In-memory store for tests and ephemeral runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("open feedback store: {e}")))?;
        let store = FeedbackStore {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS feedback (
                id TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                query_fingerprint TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                rating INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                response TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at REAL NOT NULL,
                UNIQUE (query_fingerprint, doc_id, user_id, created_at)
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_doc
                ON feedback(doc_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_feedback_fingerprint
                ON feedback(query_fingerprint);",
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Record one rating; returns the row id
    pub async fn record(
        &self,
        query: &str,
        doc_id: &str,
        rating: i64,
        user_id: Option<&str>,
        response: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(Error::Validation(format!(
                "rating must be in [{MIN_RATING}, {MAX_RATING}]: {rating}"
            )));
        }
        if doc_id.is_empty() {
            return Err(Error::Validation("doc_id cannot be empty".to_string()));
        }

        let fingerprint = query_fingerprint(query);
        let created_at = now_epoch();
        let user = user_id.unwrap_or("anonymous");
        let id = {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(format!("{fingerprint}:{doc_id}:{user}:{created_at}"));
            hex::encode(hasher.finalize())[..16].to_string()
        };
        let metadata_text =
            serde_json::to_string(&metadata.unwrap_or(serde_json::Value::Null))?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO feedback
             (id, query, query_fingerprint, doc_id, rating, user_id, response, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                id,
                query,
                fingerprint,
                doc_id,
                rating,
                user,
                response,
                metadata_text,
                created_at
            ],
        )
        .map_err(store_err)?;

        debug!(doc_id, rating, user, "feedback recorded");
        Ok(id)
    }

    /// Score adjustments in [-0.5, +0.5] for a set of documents
    ///
    /// Documents without usable feedback are absent from the map.
    pub async fn get_scores(
        &self,
        query: &str,
        doc_ids: &[String],
    ) -> Result<HashMap<String, f64>> {
        if doc_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let fingerprint = query_fingerprint(query);
        let now = now_epoch();

        let conn = self.conn.lock();
        let placeholders = vec!["?"; doc_ids.len()].join(", ");
        let sql = format!(
            "SELECT doc_id, rating, created_at, query_fingerprint
             FROM feedback WHERE doc_id IN ({placeholders})"
        );
        let mut statement = conn.prepare(&sql).map_err(store_err)?;
        let rows = statement
            .query_map(rusqlite::params_from_iter(doc_ids.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(store_err)?;

        let mut sums: HashMap<String, (f64, f64)> = HashMap::new();
        for row in rows {
            let (doc_id, rating, created_at, row_fingerprint) = row.map_err(store_err)?;
            let age = (now - created_at).max(0.0);
            let decay = 1.0 - age / DECAY_WINDOW_SECS;
            if decay <= 0.0 {
                continue;
            }
            let specificity = if row_fingerprint == fingerprint {
                QUERY_SPECIFIC_WEIGHT
            } else {
                GLOBAL_WEIGHT
            };
            let weight = decay * specificity;
            let normalized = rating as f64 / MAX_RATING as f64;
            let entry = sums.entry(doc_id).or_insert((0.0, 0.0));
            entry.0 += normalized * weight;
            entry.1 += weight;
        }

        Ok(sums
            .into_iter()
            .filter(|(_, (_, weight_sum))| *weight_sum > 0.0)
            .map(|(doc_id, (score_sum, weight_sum))| {
                let adjustment = (score_sum / weight_sum * 0.5).clamp(-0.5, 0.5);
                (doc_id, adjustment)
            })
            .collect())
    }

    /// Most recent rows, newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<FeedbackRecord>> {
        let conn = self.conn.lock();
        let mut statement = conn
            .prepare(
                "SELECT id, query, query_fingerprint, doc_id, rating, user_id, response,
                        metadata, created_at
                 FROM feedback ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(store_err)?;
        let rows = statement
            .query_map([limit as i64], |row| {
                Ok(FeedbackRecord {
                    id: row.get(0)?,
                    query: row.get(1)?,
                    query_fingerprint: row.get(2)?,
                    doc_id: row.get(3)?,
                    rating: row.get(4)?,
                    user_id: row.get(5)?,
                    response: row.get(6)?,
                    metadata: serde_json::from_str(&row.get::<_, String>(7)?)
                        .unwrap_or(serde_json::Value::Null),
                    created_at: row.get(8)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)
    }

    /// Aggregate counters
    pub async fn stats(&self) -> Result<FeedbackStats> {
        let conn = self.conn.lock();
        let (total, positive, negative, audit_rows) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(rating > 0), 0),
                        COALESCE(SUM(rating < 0), 0),
                        COALESCE(SUM(user_id LIKE 'system:%'), 0)
                 FROM feedback",
                [],
                |row| {
                    Ok((
                        row.get::<_, u64>(0)?,
                        row.get::<_, u64>(1)?,
                        row.get::<_, u64>(2)?,
                        row.get::<_, u64>(3)?,
                    ))
                },
            )
            .map_err(store_err)?;

        Ok(FeedbackStats {
            total,
            positive,
            negative,
            audit_rows,
            positive_rate: if total > 0 {
                positive as f64 / total as f64
            } else {
                0.0
            },
        })
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}
