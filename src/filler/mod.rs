//! Filler / annotation strategies.
//!
//! While specialist requests are outstanding the assistant can keep the
//! human informed ("still checking with the specialists…").  A strategy
//! collects candidate lines from dispatch notices and network activity and
//! decides when one is due.  Strategies never touch the wire; the session
//! decides whether and how to speak what they return.

pub mod dispatch_only;
pub mod noop;
pub mod priority;

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{FillerConfig, FillerKind};

pub use dispatch_only::DispatchOnlyStrategy;
pub use noop::NoopStrategy;
pub use priority::PriorityStrategy;

// ---------------------------------------------------------------------------
// NetworkActivity
// ---------------------------------------------------------------------------

/// Something observable happened inside the specialist network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkActivity {
    AgentJoined { agent: String },
    AgentMessage { from: String, to: String },
    ToolUsed { agent: String, tool: String },
    Progress { agent: String, note: String },
    PartialResult { call_id: String, summary: String },
}

impl NetworkActivity {
    /// Higher is more worth saying out loud.
    pub fn priority(&self) -> u8 {
        match self {
            Self::AgentJoined { .. } => 0,
            Self::AgentMessage { .. } => 1,
            Self::ToolUsed { .. } => 2,
            Self::Progress { .. } => 3,
            Self::PartialResult { .. } => 4,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::AgentJoined { agent } => format!("{agent} has joined to help."),
            Self::AgentMessage { from, to } => format!("{from} is consulting {to}."),
            Self::ToolUsed { agent, tool } => format!("{agent} is using {tool}."),
            Self::Progress { agent, note } => format!("{agent}: {note}"),
            Self::PartialResult { summary, .. } => format!("Early finding: {summary}"),
        }
    }
}

// ---------------------------------------------------------------------------
// AnnotationStrategy
// ---------------------------------------------------------------------------

pub trait AnnotationStrategy: Send {
    fn name(&self) -> &'static str;

    /// A forwarded operation was just dispatched.
    fn on_invocation_dispatched(&mut self, call_id: &str, operation: &str, now: Instant);

    fn on_network_activity(&mut self, _activity: NetworkActivity, _now: Instant) {}

    /// The result for `call_id` arrived; anything queued about it is moot.
    fn on_invocation_resolved(&mut self, _call_id: &str) {}

    /// A fresh candidate exists and the minimum spacing has passed.
    fn should_annotate(&self, now: Instant) -> bool;

    /// Take the next due line, if any.
    fn next_annotation(&mut self, now: Instant) -> Option<String>;
}

/// Build the configured strategy.
pub fn from_config(config: &FillerConfig) -> Box<dyn AnnotationStrategy> {
    let pacing = Pacing::new(
        Duration::from_secs(config.min_spacing_secs),
        Duration::from_secs(config.max_age_secs),
    );
    match config.strategy {
        FillerKind::Off => Box::new(NoopStrategy),
        FillerKind::DispatchOnly => Box::new(DispatchOnlyStrategy::new(pacing)),
        FillerKind::Priority => Box::new(PriorityStrategy::new(pacing, config.capacity)),
    }
}

// ---------------------------------------------------------------------------
// Pacing
// ---------------------------------------------------------------------------

/// Spacing and staleness rules shared by the strategies.
#[derive(Debug, Clone)]
pub struct Pacing {
    min_spacing: Duration,
    max_age: Duration,
    last_spoken: Option<Instant>,
}

impl Pacing {
    pub fn new(min_spacing: Duration, max_age: Duration) -> Self {
        Self {
            min_spacing,
            max_age,
            last_spoken: None,
        }
    }

    pub fn spacing_elapsed(&self, now: Instant) -> bool {
        self.last_spoken
            .map_or(true, |last| now.saturating_duration_since(last) >= self.min_spacing)
    }

    pub fn is_fresh(&self, created: Instant, now: Instant) -> bool {
        now.saturating_duration_since(created) <= self.max_age
    }

    pub fn mark_spoken(&mut self, now: Instant) {
        self.last_spoken = Some(now);
    }
}
