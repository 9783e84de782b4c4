//! Silent strategy: the assistant waits for results without filler.

use tokio::time::Instant;

use super::AnnotationStrategy;

/// Never annotates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStrategy;

impl AnnotationStrategy for NoopStrategy {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn on_invocation_dispatched(&mut self, _call_id: &str, _operation: &str, _now: Instant) {}

    fn should_annotate(&self, _now: Instant) -> bool {
        false
    }

    fn next_annotation(&mut self, _now: Instant) -> Option<String> {
        None
    }
}
