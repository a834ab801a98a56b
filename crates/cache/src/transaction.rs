//! Transaction tracking for multi-key cache sequences
//!
//! The cache layer composes multi-key atomic sequences by bracketing them
//! in a transaction: the caller records each operation (with its previous
//! value) as it goes, and on failure feeds the recorded list to the cache's
//! rollback. The manager here owns the lifecycle state.
//!
//! State transitions:
//! - `Active` → `Committed` (commit)
//! - `Active` → `RolledBack` (rollback)
//! - `Active` → `Expired` (timeout sweep)
//!
//! Terminal states are sticky: committing a rolled-back transaction fails,
//! rolling back a committed transaction fails, and the expiry sweep never
//! touches terminal transactions. Re-committing a committed transaction
//! (and re-rolling-back a rolled-back one) is an idempotent success.

use parking_lot::Mutex;
use sentra_core::{now_epoch, Error, Result, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Open; operations may still be recorded
    Active,
    /// Terminal: committed successfully
    Committed,
    /// Terminal: rolled back by the caller
    RolledBack,
    /// Terminal: expired by the timeout sweep while still active
    Expired,
}

impl TransactionStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Active)
    }
}

/// One operation recorded under a transaction, with enough context to
/// build its inverse
#[derive(Debug, Clone)]
pub struct TxOperation {
    /// "set" or "delete"
    pub kind: &'static str,
    /// Affected cache key
    pub key: String,
    /// Value before the operation, if any
    pub previous_value: Option<Value>,
    /// TTL before the operation, if any
    pub previous_ttl: Option<f64>,
}

/// Full transaction record
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    /// Unique transaction id
    pub id: Uuid,
    /// Primary key the caller associated with this transaction
    pub key: String,
    /// Start time, epoch seconds
    pub started_at: f64,
    /// Ordered recorded operations
    pub operations: Vec<TxOperation>,
    /// Current lifecycle status
    pub status: TransactionStatus,
}

/// Inspection view of a transaction
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    /// Transaction id
    pub id: Uuid,
    /// Primary key
    pub key: String,
    /// Status at the time of inspection
    pub status: TransactionStatus,
    /// Start time, epoch seconds
    pub started_at: f64,
    /// Age at the time of inspection, seconds
    pub age_seconds: f64,
    /// Number of recorded operations
    pub operation_count: usize,
}

struct TxState {
    transactions: HashMap<Uuid, TransactionRecord>,
    active: HashSet<Uuid>,
}

/// Tracks open transactions and their commit/rollback transitions
pub struct TransactionManager {
    max_active: usize,
    timeout_seconds: f64,
    state: Mutex<TxState>,
}

impl TransactionManager {
    /// Create a manager with the given cap and timeout
    pub fn new(max_active: usize, timeout_seconds: f64) -> Self {
        info!(max_active, timeout_seconds, "transaction manager initialized");
        TransactionManager {
            max_active,
            timeout_seconds,
            state: Mutex::new(TxState {
                transactions: HashMap::new(),
                active: HashSet::new(),
            }),
        }
    }

    /// Begin a transaction for a primary key
    ///
    /// Fails with a capacity error once the active-transaction cap is
    /// reached.
    pub fn begin(&self, primary_key: &str) -> Result<Uuid> {
        if primary_key.is_empty() {
            return Err(Error::Validation(
                "transaction key cannot be empty".to_string(),
            ));
        }

        let mut state = self.state.lock();
        if state.active.len() >= self.max_active {
            return Err(Error::Capacity(format!(
                "maximum active transactions ({}) exceeded",
                self.max_active
            )));
        }

        let id = Uuid::new_v4();
        state.transactions.insert(
            id,
            TransactionRecord {
                id,
                key: primary_key.to_string(),
                started_at: now_epoch(),
                operations: Vec::new(),
                status: TransactionStatus::Active,
            },
        );
        state.active.insert(id);
        debug!(%id, key = %primary_key, total_active = state.active.len(), "transaction started");
        Ok(id)
    }

    /// Record an operation under an active transaction
    ///
    /// Returns false if the transaction is unknown or no longer active.
    pub fn record_operation(&self, id: Uuid, operation: TxOperation) -> bool {
        let mut state = self.state.lock();
        match state.transactions.get_mut(&id) {
            Some(record) if record.status == TransactionStatus::Active => {
                record.operations.push(operation);
                true
            }
            _ => false,
        }
    }

    /// Transition active → committed
    ///
    /// Committing an already-committed transaction returns true; committing
    /// a rolled-back or expired transaction returns false.
    pub fn commit(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        let record = match state.transactions.get_mut(&id) {
            Some(record) => record,
            None => {
                warn!(%id, "transaction not found for commit");
                return false;
            }
        };
        match record.status {
            TransactionStatus::Committed => {
                warn!(%id, "transaction already committed");
                true
            }
            TransactionStatus::RolledBack | TransactionStatus::Expired => {
                warn!(%id, status = ?record.status, "cannot commit terminal transaction");
                false
            }
            TransactionStatus::Active => {
                record.status = TransactionStatus::Committed;
                let key = record.key.clone();
                let operation_count = record.operations.len();
                state.active.remove(&id);
                info!(%id, key = %key, operation_count, "transaction committed");
                true
            }
        }
    }

    /// Transition active → rolled back
    ///
    /// Rolling back an already-rolled-back transaction returns true;
    /// rolling back a committed or expired transaction returns false.
    pub fn rollback(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        let record = match state.transactions.get_mut(&id) {
            Some(record) => record,
            None => {
                warn!(%id, "transaction not found for rollback");
                return false;
            }
        };
        match record.status {
            TransactionStatus::RolledBack => {
                warn!(%id, "transaction already rolled back");
                true
            }
            TransactionStatus::Committed | TransactionStatus::Expired => {
                warn!(%id, status = ?record.status, "cannot roll back terminal transaction");
                false
            }
            TransactionStatus::Active => {
                record.status = TransactionStatus::RolledBack;
                let key = record.key.clone();
                let operation_count = record.operations.len();
                state.active.remove(&id);
                info!(%id, key = %key, operation_count, "transaction rolled back");
                true
            }
        }
    }

    /// Status without a state change
    pub fn state(&self, id: Uuid) -> Option<TransactionStatus> {
        self.state.lock().transactions.get(&id).map(|r| r.status)
    }

    /// Detailed inspection without a state change
    pub fn info(&self, id: Uuid) -> Option<TransactionInfo> {
        let state = self.state.lock();
        state.transactions.get(&id).map(|record| TransactionInfo {
            id: record.id,
            key: record.key.clone(),
            status: record.status,
            started_at: record.started_at,
            age_seconds: now_epoch() - record.started_at,
            operation_count: record.operations.len(),
        })
    }

    /// Recorded operations of a transaction, oldest first
    pub fn operations(&self, id: Uuid) -> Option<Vec<TxOperation>> {
        self.state
            .lock()
            .transactions
            .get(&id)
            .map(|r| r.operations.clone())
    }

    /// Number of currently active transactions
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Expire active transactions older than the timeout
    ///
    /// Terminal transactions are never touched. Returns the expired count.
    pub fn cleanup_expired(&self) -> usize {
        let now = now_epoch();
        let mut state = self.state.lock();

        let expired: Vec<Uuid> = state
            .transactions
            .values()
            .filter(|r| {
                r.status == TransactionStatus::Active
                    && now - r.started_at > self.timeout_seconds
            })
            .map(|r| r.id)
            .collect();

        for id in &expired {
            if let Some(record) = state.transactions.get_mut(id) {
                record.status = TransactionStatus::Expired;
                debug!(%id, key = %record.key, "expired transaction");
            }
            state.active.remove(id);
        }

        if !expired.is_empty() {
            info!(
                count = expired.len(),
                remaining_active = state.active.len(),
                "cleaned up expired transactions"
            );
        }
        expired.len()
    }

    /// Drop all transaction state; returns the number cleared
    pub fn clear_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.transactions.len();
        state.transactions.clear();
        state.active.clear();
        warn!(count, "all transactions cleared");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TransactionManager {
        TransactionManager::new(10, 300.0)
    }

    #[test]
    fn test_begin_commit() {
        let txns = manager();
        let id = txns.begin("user:1").unwrap();
        assert_eq!(txns.state(id), Some(TransactionStatus::Active));
        assert_eq!(txns.active_count(), 1);
        assert!(txns.commit(id));
        assert_eq!(txns.state(id), Some(TransactionStatus::Committed));
        assert_eq!(txns.active_count(), 0);
    }

    #[test]
    fn test_commit_after_rollback_fails_and_state_sticks() {
        let txns = manager();
        let id = txns.begin("k").unwrap();
        assert!(txns.rollback(id));
        assert!(!txns.commit(id));
        assert_eq!(txns.state(id), Some(TransactionStatus::RolledBack));
    }

    #[test]
    fn test_rollback_after_commit_fails_and_state_sticks() {
        let txns = manager();
        let id = txns.begin("k").unwrap();
        assert!(txns.commit(id));
        assert!(!txns.rollback(id));
        assert_eq!(txns.state(id), Some(TransactionStatus::Committed));
    }

    #[test]
    fn test_double_commit_is_idempotent() {
        let txns = manager();
        let id = txns.begin("k").unwrap();
        assert!(txns.commit(id));
        assert!(txns.commit(id));
    }

    #[test]
    fn test_double_rollback_is_idempotent() {
        let txns = manager();
        let id = txns.begin("k").unwrap();
        assert!(txns.rollback(id));
        assert!(txns.rollback(id));
    }

    #[test]
    fn test_unknown_id() {
        let txns = manager();
        let id = Uuid::new_v4();
        assert!(!txns.commit(id));
        assert!(!txns.rollback(id));
        assert_eq!(txns.state(id), None);
        assert!(txns.info(id).is_none());
    }

    #[test]
    fn test_active_cap() {
        let txns = TransactionManager::new(2, 300.0);
        txns.begin("a").unwrap();
        txns.begin("b").unwrap();
        let err = txns.begin("c").unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn test_cap_frees_after_terminal() {
        let txns = TransactionManager::new(1, 300.0);
        let id = txns.begin("a").unwrap();
        assert!(txns.begin("b").is_err());
        txns.commit(id);
        assert!(txns.begin("b").is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        let txns = manager();
        assert!(txns.begin("").unwrap_err().is_validation());
    }

    #[test]
    fn test_record_operations() {
        let txns = manager();
        let id = txns.begin("k").unwrap();
        assert!(txns.record_operation(
            id,
            TxOperation {
                kind: "set",
                key: "k:a".to_string(),
                previous_value: None,
                previous_ttl: None,
            }
        ));
        assert_eq!(txns.info(id).unwrap().operation_count, 1);

        txns.commit(id);
        // Terminal transactions accept no further operations
        assert!(!txns.record_operation(
            id,
            TxOperation {
                kind: "delete",
                key: "k:b".to_string(),
                previous_value: None,
                previous_ttl: None,
            }
        ));
    }

    #[test]
    fn test_cleanup_expires_only_stale_active() {
        let txns = TransactionManager::new(10, 0.0);
        let stale = txns.begin("stale").unwrap();
        let committed = txns.begin("done").unwrap();
        txns.commit(committed);

        // timeout_seconds = 0 means any active transaction with measurable
        // age expires; sleep enough for the clock to advance
        std::thread::sleep(std::time::Duration::from_millis(10));
        let expired = txns.cleanup_expired();
        assert_eq!(expired, 1);
        assert_eq!(txns.state(stale), Some(TransactionStatus::Expired));
        assert_eq!(txns.state(committed), Some(TransactionStatus::Committed));

        // Expired is terminal
        assert!(!txns.commit(stale));
        assert!(!txns.rollback(stale));
    }

    #[test]
    fn test_clear_all() {
        let txns = manager();
        txns.begin("a").unwrap();
        txns.begin("b").unwrap();
        assert_eq!(txns.clear_all(), 2);
        assert_eq!(txns.active_count(), 0);
    }
}
