//! Operations forwarded to the specialist network and not yet answered.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingOp {
    pub call_id: String,
    pub anchor: Option<String>,
    pub operation: String,
    pub dispatched_at: Instant,
}

/// Keyed by `call_id`.  Entries leave either through a delivered result or
/// through the timeout sweep, never both.
#[derive(Default)]
pub struct OutstandingOps {
    ops: Mutex<HashMap<String, OutstandingOp>>,
}

impl OutstandingOps {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OutstandingOp>> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, op: OutstandingOp) {
        if let Some(prev) = self.lock().insert(op.call_id.clone(), op) {
            log::warn!("injection: call {} dispatched twice", prev.call_id);
        }
    }

    /// Claim the operation for `call_id`.
    pub fn resolve(&self, call_id: &str) -> Option<OutstandingOp> {
        self.lock().remove(call_id)
    }

    /// Remove and return every operation dispatched at least `ceiling` ago,
    /// oldest first.
    pub fn expire(&self, now: Instant, ceiling: Duration) -> Vec<OutstandingOp> {
        let mut ops = self.lock();
        let expired: Vec<String> = ops
            .values()
            .filter(|op| op.dispatched_at + ceiling <= now)
            .map(|op| op.call_id.clone())
            .collect();
        let mut out: Vec<OutstandingOp> =
            expired.iter().filter_map(|id| ops.remove(id)).collect();
        out.sort_by_key(|op| op.dispatched_at);
        out
    }

    /// When the oldest operation will hit `ceiling`.
    pub fn next_deadline(&self, ceiling: Duration) -> Option<Instant> {
        self.lock().values().map(|op| op.dispatched_at + ceiling).min()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.lock().contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
