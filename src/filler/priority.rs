//! Bounded priority queue over dispatch notices and network activity.
//!
//! Highest priority is spoken first, oldest first among equals.  When the
//! queue overflows the lowest-priority (then oldest) candidate is dropped.

use tokio::time::Instant;

use super::{AnnotationStrategy, NetworkActivity, Pacing};

/// Priority of a plain "dispatched" notice relative to
/// [`NetworkActivity::priority`].
const DISPATCH_PRIORITY: u8 = 3;

#[derive(Debug, Clone)]
struct Candidate {
    priority: u8,
    seq: u64,
    call_id: Option<String>,
    text: String,
    created: Instant,
}

pub struct PriorityStrategy {
    pacing: Pacing,
    capacity: usize,
    entries: Vec<Candidate>,
    next_seq: u64,
}

impl PriorityStrategy {
    pub fn new(pacing: Pacing, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pacing,
            capacity,
            entries: Vec::with_capacity(capacity + 1),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, priority: u8, call_id: Option<String>, text: String, now: Instant) {
        self.entries.push(Candidate {
            priority,
            seq: self.next_seq,
            call_id,
            text,
            created: now,
        });
        self.next_seq += 1;

        if self.entries.len() > self.capacity {
            if let Some(idx) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| (c.priority, c.seq))
                .map(|(i, _)| i)
            {
                let dropped = self.entries.swap_remove(idx);
                log::debug!("filler: queue full, dropped \"{}\"", dropped.text);
            }
        }
    }

    fn prune_stale(&mut self, now: Instant) {
        let pacing = &self.pacing;
        self.entries.retain(|c| pacing.is_fresh(c.created, now));
    }
}

impl AnnotationStrategy for PriorityStrategy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn on_invocation_dispatched(&mut self, call_id: &str, _operation: &str, now: Instant) {
        self.push(
            DISPATCH_PRIORITY,
            Some(call_id.to_owned()),
            "I've asked the specialists; bear with me.".to_owned(),
            now,
        );
    }

    fn on_network_activity(&mut self, activity: NetworkActivity, now: Instant) {
        let call_id = match &activity {
            NetworkActivity::PartialResult { call_id, .. } => Some(call_id.clone()),
            _ => None,
        };
        self.push(activity.priority(), call_id, activity.describe(), now);
    }

    fn on_invocation_resolved(&mut self, call_id: &str) {
        self.entries
            .retain(|c| c.call_id.as_deref() != Some(call_id));
    }

    fn should_annotate(&self, now: Instant) -> bool {
        self.pacing.spacing_elapsed(now)
            && self.entries.iter().any(|c| self.pacing.is_fresh(c.created, now))
    }

    fn next_annotation(&mut self, now: Instant) -> Option<String> {
        self.prune_stale(now);
        if !self.pacing.spacing_elapsed(now) {
            return None;
        }
        let idx = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, c)| (c.priority, std::cmp::Reverse(c.seq)))
            .map(|(i, _)| i)?;
        let chosen = self.entries.swap_remove(idx);
        self.pacing.mark_spoken(now);
        Some(chosen.text)
    }
}
