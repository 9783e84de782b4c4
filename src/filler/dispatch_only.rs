//! At most one line per dispatched operation, nothing else.

use std::collections::{HashSet, VecDeque};

use tokio::time::Instant;

use super::{AnnotationStrategy, Pacing};

const PHRASES: [&str; 3] = [
    "I've passed that to the specialists; it may take a moment.",
    "The specialists are looking into it now.",
    "Still waiting on the specialists for that one.",
];

struct Candidate {
    call_id: String,
    text: String,
    created: Instant,
}

pub struct DispatchOnlyStrategy {
    pacing: Pacing,
    queue: VecDeque<Candidate>,
    /// Calls that already got their one line (queued or spoken).
    announced: HashSet<String>,
    phrase: usize,
}

impl DispatchOnlyStrategy {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            pacing,
            queue: VecDeque::new(),
            announced: HashSet::new(),
            phrase: 0,
        }
    }
}

impl AnnotationStrategy for DispatchOnlyStrategy {
    fn name(&self) -> &'static str {
        "dispatch-only"
    }

    fn on_invocation_dispatched(&mut self, call_id: &str, operation: &str, now: Instant) {
        if !self.announced.insert(call_id.to_owned()) {
            return;
        }
        let text = PHRASES[self.phrase % PHRASES.len()].to_owned();
        self.phrase += 1;
        log::debug!("filler: queued line for {call_id} ({operation})");
        self.queue.push_back(Candidate {
            call_id: call_id.to_owned(),
            text,
            created: now,
        });
    }

    fn on_invocation_resolved(&mut self, call_id: &str) {
        self.queue.retain(|c| c.call_id != call_id);
    }

    fn should_annotate(&self, now: Instant) -> bool {
        self.pacing.spacing_elapsed(now)
            && self.queue.iter().any(|c| self.pacing.is_fresh(c.created, now))
    }

    fn next_annotation(&mut self, now: Instant) -> Option<String> {
        if !self.pacing.spacing_elapsed(now) {
            return None;
        }
        while let Some(candidate) = self.queue.pop_front() {
            if self.pacing.is_fresh(candidate.created, now) {
                self.pacing.mark_spoken(now);
                return Some(candidate.text);
            }
            log::debug!("filler: dropped stale line for {}", candidate.call_id);
        }
        None
    }
}
