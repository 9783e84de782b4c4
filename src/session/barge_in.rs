//! Client-side detection of the human talking over the assistant.
//!
//! Energy only: after a grace period from the start of assistant speech,
//! the RMS of the most recent microphone window is compared against a
//! threshold at a fixed interval.  There is no echo cancellation, so the
//! threshold must sit above the level of the assistant's own voice leaking
//! back into the microphone.

use std::time::Duration;

use crate::audio::EnergyGate;
use crate::config::BargeInConfig;

#[derive(Debug, Clone)]
pub struct BargeInDetector {
    gate: EnergyGate,
    pub grace: Duration,
    pub interval: Duration,
    pub window: usize,
    truncate_offset: Duration,
}

impl BargeInDetector {
    pub fn from_config(config: &BargeInConfig) -> Self {
        Self {
            gate: EnergyGate::new(config.threshold),
            grace: Duration::from_millis(config.grace_ms),
            interval: Duration::from_millis(config.check_interval_ms.max(1)),
            window: config.window_samples.max(1),
            truncate_offset: Duration::from_millis(config.truncate_offset_ms),
        }
    }

    /// `recent` is loud enough to count as an interruption.
    pub fn is_interruption(&self, recent: &[f32]) -> bool {
        self.gate.is_open(recent)
    }

    /// `audio_end_ms` for the truncation notice: elapsed playback plus the
    /// safety offset, never past the audio actually scheduled.
    pub fn truncation_point_ms(&self, elapsed: Duration, scheduled: Duration) -> u64 {
        (elapsed + self.truncate_offset).min(scheduled).as_millis() as u64
    }
}
