//! Sample-rate conversion and channel mixing.
//!
//! Audio hardware runs at whatever rate and channel count the device
//! prefers (commonly 44.1 or 48 kHz stereo) while the realtime endpoint
//! speaks mono PCM16 at the wire rate (24 kHz by default).  Both directions
//! go through the helpers here:
//!
//! 1. [`downmix_to_mono`] averages interleaved channels.
//! 2. [`resample`] converts between two rates with linear interpolation.
//!
//! Linear interpolation is enough for speech and keeps the per-callback
//! cost trivial.

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.  A trailing partial
/// frame is ignored.
///
/// ```rust
/// use voice_bridge::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let width = usize::from(channels);
    if width <= 1 {
        return if width == 1 { samples.to_vec() } else { Vec::new() };
    }
    let scale = 1.0 / width as f32;
    samples
        .chunks_exact(width)
        .map(|frame| frame.iter().copied().sum::<f32>() * scale)
        .collect()
}

/// Duplicate mono samples across `channels` interleaved outputs.
pub fn upmix_from_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let n = channels.max(1) as usize;
    if n == 1 {
        return samples.to_vec();
    }
    let mut out = Vec::with_capacity(samples.len() * n);
    for &s in samples {
        out.extend(std::iter::repeat(s).take(n));
    }
    out
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `from_rate` Hz to `to_rate` Hz.
///
/// Equal rates return a copy.  Output length is
/// `ceil(samples.len() * to_rate / from_rate)`.
///
/// ```rust
/// use voice_bridge::audio::resample;
///
/// let device = vec![0.5_f32; 480]; // 10 ms @ 48 kHz
/// let wire = resample(&device, 48_000, 24_000);
/// assert_eq!(wire.len(), 240);
/// ```
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    let Some(&last) = samples.last() else {
        return Vec::new();
    };
    if from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    // Source position advanced per output sample.
    let step = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / step).ceil() as usize;

    (0..out_len)
        .map(|n| {
            let pos = n as f64 * step;
            let left = pos.floor() as usize;
            let weight = (pos - left as f64) as f32;
            let a = samples.get(left).copied().unwrap_or(last);
            let b = samples.get(left + 1).copied().unwrap_or(a);
            a + (b - a) * weight
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
