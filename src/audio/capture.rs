//! Microphone capture via `cpal`.
//!
//! [`CaptureDevice`] is the seam between the session and the hardware.
//! [`CpalCapture`] opens the system default input device on a dedicated
//! `audio-capture` thread (a `cpal::Stream` is not `Send` on every
//! platform, so it never leaves that thread) and emits fixed-size mono
//! frames at the wire rate over a tokio channel.  The returned
//! [`CaptureHandle`] is a RAII guard: dropping it stops the stream and
//! joins the thread.
//!
//! [`CapturePipeline`] tracks whether capture is running and whether it is
//! muted.  Muting keeps the device open; the session simply discards the
//! frames it receives.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::mpsc;

use super::resample::{downmix_to_mono, resample};

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or running the audio capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio capture thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// WireFormat
// ---------------------------------------------------------------------------

/// Shape of the frames handed to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    /// Mono sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per emitted frame.
    pub frame_samples: usize,
}

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

/// Turns arbitrary device callbacks into fixed-size wire-rate mono frames.
///
/// Leftover samples are carried into the next call, so every emitted frame
/// has exactly `frame_samples` samples.
pub struct FrameAssembler {
    source_rate: u32,
    channels: u16,
    format: WireFormat,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(source_rate: u32, channels: u16, format: WireFormat) -> Self {
        Self {
            source_rate,
            channels,
            format,
            pending: Vec::with_capacity(format.frame_samples * 2),
        }
    }

    /// Feed one interleaved device buffer; returns the frames it completed.
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<Vec<f32>> {
        let mono = downmix_to_mono(interleaved, self.channels);
        self.pending
            .extend(resample(&mono, self.source_rate, self.format.sample_rate));

        let size = self.format.frame_samples.max(1);
        let mut frames = Vec::new();
        while self.pending.len() >= size {
            let rest = self.pending.split_off(size);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// CaptureHandle
// ---------------------------------------------------------------------------

/// RAII guard for a running capture.  Dropping it stops the device.
pub struct CaptureHandle {
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Handle with no thread behind it, for devices that need no teardown.
    pub fn detached() -> Self {
        Self {
            stop: None,
            thread: None,
        }
    }

    fn shutdown(&mut self) {
        // Closing the channel wakes the capture thread.
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("capture: audio thread panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// CaptureDevice
// ---------------------------------------------------------------------------

/// Source of microphone frames.
pub trait CaptureDevice: Send + Sync {
    /// Open the device and start sending frames of `format` to `frames`.
    fn open(
        &self,
        format: WireFormat,
        frames: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<CaptureHandle, CaptureError>;
}

/// The system default input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCapture;

impl CpalCapture {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureDevice for CpalCapture {
    fn open(
        &self,
        format: WireFormat,
        frames: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<CaptureHandle, CaptureError> {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), CaptureError>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match build_input_stream(format, frames) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until the handle drops its sender.
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("capture: input stream closed");
            })
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(CaptureHandle {
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Thread("capture thread exited during setup".into()))
            }
        }
    }
}

fn build_input_stream(
    format: WireFormat,
    frames: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
    let supported = device.default_input_config()?;

    let channels = supported.channels();
    let source_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();
    log::info!(
        "capture: opened input at {source_rate} Hz, {channels} channel(s); framing {} samples @ {} Hz",
        format.frame_samples,
        format.sample_rate
    );

    let mut assembler = FrameAssembler::new(source_rate, channels, format);
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for frame in assembler.push(data) {
                // Receiver gone means the session is shutting down.
                let _ = frames.send(frame);
            }
        },
        |err: cpal::StreamError| {
            log::error!("capture: stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// CapturePipeline
// ---------------------------------------------------------------------------

/// Recording and mute state for one capture device.
pub struct CapturePipeline {
    device: Arc<dyn CaptureDevice>,
    format: WireFormat,
    handle: Option<CaptureHandle>,
    /// Recording was requested and not explicitly stopped since.
    wanted: bool,
    muted: bool,
}

impl CapturePipeline {
    pub fn new(device: Arc<dyn CaptureDevice>, format: WireFormat) -> Self {
        Self {
            device,
            format,
            handle: None,
            wanted: false,
            muted: false,
        }
    }

    /// Open the device.
    ///
    /// Returns the frame receiver when a new capture was started, `None`
    /// when one was already running.
    pub fn start(&mut self) -> Result<Option<mpsc::UnboundedReceiver<Vec<f32>>>, CaptureError> {
        if self.handle.is_some() {
            self.wanted = true;
            return Ok(None);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.device.open(self.format, tx)?;
        self.handle = Some(handle);
        self.wanted = true;
        log::info!("capture: recording started");
        Ok(Some(rx))
    }

    /// Restart capture if it was wanted but is not running.
    pub fn resume(&mut self) -> Result<Option<mpsc::UnboundedReceiver<Vec<f32>>>, CaptureError> {
        if self.wanted && self.handle.is_none() {
            self.start()
        } else {
            Ok(None)
        }
    }

    /// Release the device.  Safe to call in any state; returns whether a
    /// capture was actually running.
    pub fn stop(&mut self) -> bool {
        self.wanted = false;
        match self.handle.take() {
            Some(handle) => {
                drop(handle);
                log::info!("capture: recording stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            log::info!("capture: {}", if muted { "muted" } else { "unmuted" });
        }
        self.muted = muted;
    }

    /// Flip the mute flag and return the new value.
    pub fn toggle_mute(&mut self) -> bool {
        self.set_muted(!self.muted);
        self.muted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FORMAT: WireFormat = WireFormat {
        sample_rate: 24_000,
        frame_samples: 480,
    };

    struct CountingDevice {
        opens: AtomicUsize,
        fail: bool,
    }

    impl CaptureDevice for CountingDevice {
        fn open(
            &self,
            _format: WireFormat,
            _frames: mpsc::UnboundedSender<Vec<f32>>,
        ) -> Result<CaptureHandle, CaptureError> {
            if self.fail {
                return Err(CaptureError::NoDevice);
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(CaptureHandle::detached())
        }
    }

    fn pipeline(fail: bool) -> (Arc<CountingDevice>, CapturePipeline) {
        let device = Arc::new(CountingDevice {
            opens: AtomicUsize::new(0),
            fail,
        });
        let pipeline = CapturePipeline::new(device.clone(), FORMAT);
        (device, pipeline)
    }

    #[test]
    fn assembler_emits_fixed_frames_and_carries_remainder() {
        let mut asm = FrameAssembler::new(24_000, 1, FORMAT);
        assert!(asm.push(&[0.1; 300]).is_empty());
        let frames = asm.push(&[0.1; 700]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 480));
        assert_eq!(asm.pending(), 40);
    }

    #[test]
    fn assembler_downmixes_and_resamples() {
        // 20 ms of 48 kHz stereo → 480 mono samples at 24 kHz
        let mut asm = FrameAssembler::new(48_000, 2, FORMAT);
        let frames = asm.push(&vec![0.25; 960 * 2]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].iter().all(|s| (s - 0.25).abs() < 1e-5));
    }

    #[test]
    fn start_twice_opens_once() {
        let (device, mut p) = pipeline(false);
        assert!(p.start().expect("start").is_some());
        assert!(p.start().expect("start").is_none());
        assert_eq!(device.opens.load(Ordering::SeqCst), 1);
        assert!(p.is_recording());
    }

    #[test]
    fn stop_is_idempotent() {
        let (_, mut p) = pipeline(false);
        assert!(!p.stop());
        p.start().expect("start");
        assert!(p.stop());
        assert!(!p.stop());
        assert!(!p.is_recording());
    }

    #[test]
    fn resume_only_when_wanted() {
        let (device, mut p) = pipeline(false);
        assert!(p.resume().expect("resume").is_none());
        p.start().expect("start");
        p.handle = None; // device lost underneath us
        assert!(p.resume().expect("resume").is_some());
        assert_eq!(device.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_open_leaves_pipeline_stopped() {
        let (_, mut p) = pipeline(true);
        assert!(matches!(p.start(), Err(CaptureError::NoDevice)));
        assert!(!p.is_recording());
        assert!(p.resume().expect("resume").is_none());
    }

    #[test]
    fn mute_is_independent_of_recording() {
        let (_, mut p) = pipeline(false);
        assert!(p.toggle_mute());
        p.start().expect("start");
        assert!(p.is_muted());
        p.stop();
        assert!(p.is_muted());
        assert!(!p.toggle_mute());
    }
}
