//! Energy measurement for short windows of mono audio.

/// Root-mean-square amplitude of `samples`; `0.0` for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_sq.sqrt()
}

/// Threshold test on RMS energy.
///
/// ```rust
/// use voice_bridge::audio::EnergyGate;
///
/// let gate = EnergyGate::new(0.06);
/// assert!(!gate.is_open(&[0.01; 256]));
/// assert!(gate.is_open(&[0.3; 256]));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct EnergyGate {
    threshold: f32,
}

impl EnergyGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// `true` when the window's RMS strictly exceeds the threshold.
    pub fn is_open(&self, samples: &[f32]) -> bool {
        !samples.is_empty() && rms(samples) > self.threshold
    }
}
