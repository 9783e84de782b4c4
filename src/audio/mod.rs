//! Audio plumbing: microphone capture, assistant playback and the sample
//! conversions between device formats and the wire.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → FrameAssembler (downmix + resample)
//!           → fixed-size wire frames (tokio mpsc) → session
//!
//! session → base64 PCM16 decode → PlaybackScheduler (warm-up, gapless)
//!         → PlaybackSink → cpal output callback
//! ```

pub mod buffer;
pub mod capture;
pub mod energy;
pub mod pcm;
pub mod playback;
pub mod resample;

pub use buffer::RingBuffer;
pub use capture::{
    CaptureDevice, CaptureError, CaptureHandle, CapturePipeline, CpalCapture, FrameAssembler,
    WireFormat,
};
pub use energy::{rms, EnergyGate};
pub use pcm::{decode_base64, encode_base64};
pub use playback::{
    CpalPlayback, Enqueued, Interruption, PlaybackError, PlaybackScheduler, PlaybackSink,
};
pub use resample::{downmix_to_mono, resample, upmix_from_mono};
