//! FIFO of results waiting to be spoken about.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A result ready for delivery into the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionEntry {
    pub call_id: String,
    pub anchor: Option<String>,
    /// JSON document sent as the function-call output.
    pub output: String,
    pub enqueued_at: Instant,
}

impl InjectionEntry {
    pub fn new(call_id: impl Into<String>, anchor: Option<String>, output: String) -> Self {
        Self {
            call_id: call_id.into(),
            anchor,
            output,
            enqueued_at: Instant::now(),
        }
    }

    pub fn success(call_id: impl Into<String>, anchor: Option<String>, result: &str) -> Self {
        let output = json!({ "status": "completed", "result": result }).to_string();
        Self::new(call_id, anchor, output)
    }

    pub fn failure(call_id: impl Into<String>, anchor: Option<String>, error: &str) -> Self {
        let output = json!({ "status": "failed", "error": error }).to_string();
        Self::new(call_id, anchor, output)
    }
}

#[derive(Default)]
pub struct InjectionQueue {
    entries: Mutex<VecDeque<InjectionEntry>>,
    notify: Notify,
}

impl InjectionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<InjectionEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, entry: InjectionEntry) {
        log::debug!("injection: queued result for {}", entry.call_id);
        self.lock().push_back(entry);
        self.notify.notify_one();
    }

    pub fn front(&self) -> Option<InjectionEntry> {
        self.lock().front().cloned()
    }

    /// Remove the head, but only if it is still the entry for `call_id`.
    pub fn pop_if(&self, call_id: &str) -> Option<InjectionEntry> {
        let mut entries = self.lock();
        if entries.front().is_some_and(|e| e.call_id == call_id) {
            entries.pop_front()
        } else {
            None
        }
    }

    /// Resolves once the queue is non-empty.
    pub async fn wait_nonempty(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
