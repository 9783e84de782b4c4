//! Assistant audio playback.
//!
//! [`PlaybackScheduler`] decides *when* each inbound fragment plays:
//!
//! * the first `warmup` fragments of a turn are held back and then released
//!   together, absorbing network jitter at the start of an utterance;
//! * every later fragment starts exactly where the previous one ends
//!   (`max(now, end of previous)`), so playback is gapless;
//! * after an interruption all scheduled audio is stopped and fragments that
//!   still arrive for the interrupted turn are dropped.
//!
//! [`PlaybackSink`] is the output device seam; [`CpalPlayback`] feeds the
//! system default output device from a dedicated `audio-playback` thread.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::time::Instant;

use super::resample::{resample, upmix_from_mono};

/// How many interrupted turn ids are remembered for dropping late fragments.
const INTERRUPTED_MEMORY: usize = 8;

// ---------------------------------------------------------------------------
// PlaybackSink
// ---------------------------------------------------------------------------

/// Output device seam.
pub trait PlaybackSink: Send + Sync {
    /// Queue mono wire-rate `samples` to start at `at`.
    fn schedule(&self, samples: &[f32], at: Instant);
    /// Silence everything queued or playing.
    fn stop_all(&self);
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Outcome of [`PlaybackScheduler::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Held back during warm-up.
    Buffered,
    /// Handed to the sink (together with any warm-up backlog).
    Scheduled,
    /// Belongs to an interrupted turn.
    Dropped,
}

/// What was cut off by [`PlaybackScheduler::interrupt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interruption {
    pub turn_id: String,
    /// Wall time since the turn's first sample started playing.
    pub elapsed: Duration,
    /// Total audio handed to the sink for the turn.
    pub scheduled: Duration,
}

struct TurnAudio {
    id: String,
    pending: Vec<Vec<f32>>,
    warmed: bool,
    started_at: Option<Instant>,
    scheduled: Duration,
    done: bool,
}

impl TurnAudio {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            pending: Vec::new(),
            warmed: false,
            started_at: None,
            scheduled: Duration::ZERO,
            done: false,
        }
    }
}

pub struct PlaybackScheduler {
    sink: Arc<dyn PlaybackSink>,
    sample_rate: u32,
    warmup: usize,
    turn: Option<TurnAudio>,
    interrupted: VecDeque<String>,
    /// End of the last scheduled fragment.
    cursor: Option<Instant>,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn PlaybackSink>, sample_rate: u32, warmup: usize) -> Self {
        Self {
            sink,
            sample_rate: sample_rate.max(1),
            warmup: warmup.max(1),
            turn: None,
            interrupted: VecDeque::with_capacity(INTERRUPTED_MEMORY),
            cursor: None,
        }
    }

    /// Accept one decoded fragment for `turn_id`.
    pub fn enqueue(&mut self, turn_id: &str, samples: Vec<f32>, now: Instant) -> Enqueued {
        if self.interrupted.iter().any(|id| id == turn_id) {
            return Enqueued::Dropped;
        }
        if self.turn.as_ref().map(|t| t.id.as_str()) != Some(turn_id) {
            if let Some(prev) = &self.turn {
                log::debug!("playback: turn {} superseded by {turn_id}", prev.id);
            }
            self.turn = Some(TurnAudio::new(turn_id));
        }

        let warmup = self.warmup;
        let Some(turn) = self.turn.as_mut() else {
            return Enqueued::Dropped;
        };
        if turn.warmed {
            self.schedule(samples, now);
            return Enqueued::Scheduled;
        }
        turn.pending.push(samples);
        if turn.pending.len() >= warmup {
            self.flush(now);
            Enqueued::Scheduled
        } else {
            Enqueued::Buffered
        }
    }

    /// The remote side finished generating `turn_id`.  Releases any warm-up
    /// backlog and returns the instant the last sample will have played, or
    /// `None` if the turn produced no audio.
    pub fn finish(&mut self, turn_id: &str, now: Instant) -> Option<Instant> {
        match self.turn.as_ref() {
            Some(turn) if turn.id == turn_id => {}
            _ => return None,
        }
        self.flush(now);
        let turn = self.turn.as_mut()?;
        turn.done = true;
        turn.started_at?;
        Some(self.cursor.map_or(now, |c| c.max(now)))
    }

    /// `true` once the current turn is finished and its audio has played out.
    pub fn is_drained(&self, now: Instant) -> bool {
        match &self.turn {
            None => true,
            Some(turn) => {
                turn.done && turn.pending.is_empty() && self.cursor.map_or(true, |c| c <= now)
            }
        }
    }

    /// End of currently scheduled audio, if any remains in the future.
    pub fn playing_until(&self, now: Instant) -> Option<Instant> {
        self.cursor.filter(|&c| c > now)
    }

    /// Forget a drained turn.  Returns whether anything was released.
    pub fn release_if_drained(&mut self, now: Instant) -> bool {
        if self.turn.is_some() && self.is_drained(now) {
            self.turn = None;
            true
        } else {
            false
        }
    }

    /// Stop playback of the current turn immediately.
    pub fn interrupt(&mut self, now: Instant) -> Option<Interruption> {
        let turn = self.turn.take()?;
        self.sink.stop_all();
        self.cursor = None;
        self.mark_interrupted(&turn.id);

        let elapsed = turn
            .started_at
            .map_or(Duration::ZERO, |start| now.saturating_duration_since(start));
        log::info!(
            "playback: interrupted turn {} after {:?} of {:?}",
            turn.id,
            elapsed,
            turn.scheduled
        );
        Some(Interruption {
            turn_id: turn.id,
            elapsed,
            scheduled: turn.scheduled,
        })
    }

    /// Refuse any later audio for `turn_id`, whether or not it produced
    /// audio yet.
    pub fn mark_interrupted(&mut self, turn_id: &str) {
        if self.interrupted.iter().any(|id| id == turn_id) {
            return;
        }
        if self.interrupted.len() == INTERRUPTED_MEMORY {
            self.interrupted.pop_front();
        }
        self.interrupted.push_back(turn_id.to_owned());
    }

    /// Drop all audio and turn bookkeeping.
    pub fn reset(&mut self) {
        self.sink.stop_all();
        self.turn = None;
        self.cursor = None;
        self.interrupted.clear();
    }

    pub fn current_turn(&self) -> Option<&str> {
        self.turn.as_ref().map(|t| t.id.as_str())
    }

    pub fn audio_started_at(&self) -> Option<Instant> {
        self.turn.as_ref().and_then(|t| t.started_at)
    }

    fn flush(&mut self, now: Instant) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        turn.warmed = true;
        let backlog = std::mem::take(&mut turn.pending);
        for samples in backlog {
            self.schedule(samples, now);
        }
    }

    fn schedule(&mut self, samples: Vec<f32>, now: Instant) {
        let start = self.cursor.map_or(now, |c| c.max(now));
        let duration = Duration::from_secs_f64(samples.len() as f64 / self.sample_rate as f64);
        self.sink.schedule(&samples, start);
        self.cursor = Some(start + duration);
        if let Some(turn) = self.turn.as_mut() {
            turn.started_at.get_or_insert(start);
            turn.scheduled += duration;
        }
    }
}

// ---------------------------------------------------------------------------
// CpalPlayback
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio playback thread failed: {0}")]
    Thread(String),
}

/// System default output device.
///
/// Fragments are appended to one contiguous sample queue drained by the
/// device callback.  The scheduler already chains start times back to back,
/// so queue order is playback order and `at` only needs to be logged.
pub struct CpalPlayback {
    queue: Arc<Mutex<VecDeque<f32>>>,
    wire_rate: u32,
    device_rate: u32,
    channels: u16,
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CpalPlayback {
    /// Open the default output device for audio arriving at `wire_rate` Hz.
    pub fn open(wire_rate: u32) -> Result<Self, PlaybackError> {
        let queue = Arc::new(Mutex::new(VecDeque::<f32>::new()));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(u32, u16), PlaybackError>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let shared = queue.clone();
        let thread = thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || {
                let (stream, rate, channels) = match build_output_stream(shared) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok((rate, channels)));
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("playback: output stream closed");
            })
            .map_err(|e| PlaybackError::Thread(e.to_string()))?;

        let (device_rate, channels) = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(PlaybackError::Thread("playback thread exited during setup".into()));
            }
        };

        Ok(Self {
            queue,
            wire_rate,
            device_rate,
            channels,
            stop: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<f32>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlaybackSink for CpalPlayback {
    fn schedule(&self, samples: &[f32], at: Instant) {
        let converted = upmix_from_mono(
            &resample(samples, self.wire_rate, self.device_rate),
            self.channels,
        );
        log::trace!(
            "playback: {} samples due in {:?}",
            samples.len(),
            at.saturating_duration_since(Instant::now())
        );
        self.queue().extend(converted);
    }

    fn stop_all(&self) {
        self.queue().clear();
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop.lock().unwrap_or_else(PoisonError::into_inner).take();
        let thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

fn build_output_stream(
    queue: Arc<Mutex<VecDeque<f32>>>,
) -> Result<(cpal::Stream, u32, u16), PlaybackError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(PlaybackError::NoDevice)?;
    let supported = device.default_output_config()?;

    let channels = supported.channels();
    let rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();
    log::info!("playback: opened output at {rate} Hz, {channels} channel(s)");

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match queue.lock() {
            Ok(mut q) => {
                for sample in data.iter_mut() {
                    *sample = q.pop_front().unwrap_or(0.0);
                }
            }
            Err(_) => data.fill(0.0),
        },
        |err: cpal::StreamError| {
            log::error!("playback: stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    Ok((stream, rate, channels))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        scheduled: Mutex<Vec<(usize, Instant)>>,
        stops: Mutex<usize>,
    }

    impl PlaybackSink for Recorder {
        fn schedule(&self, samples: &[f32], at: Instant) {
            self.scheduled.lock().unwrap().push((samples.len(), at));
        }
        fn stop_all(&self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    const RATE: u32 = 24_000;
    /// 100 ms at the wire rate.
    const FRAGMENT: usize = 2_400;

    fn scheduler(warmup: usize) -> (Arc<Recorder>, PlaybackScheduler) {
        let sink = Arc::new(Recorder::default());
        (sink.clone(), PlaybackScheduler::new(sink, RATE, warmup))
    }

    fn fragment() -> Vec<f32> {
        vec![0.1; FRAGMENT]
    }

    #[tokio::test(start_paused = true)]
    async fn warmup_holds_first_fragments() {
        let (sink, mut p) = scheduler(3);
        let now = Instant::now();
        assert_eq!(p.enqueue("r1", fragment(), now), Enqueued::Buffered);
        assert_eq!(p.enqueue("r1", fragment(), now), Enqueued::Buffered);
        assert!(sink.scheduled.lock().unwrap().is_empty());

        assert_eq!(p.enqueue("r1", fragment(), now), Enqueued::Scheduled);
        assert_eq!(sink.scheduled.lock().unwrap().len(), 3);
        assert_eq!(p.audio_started_at(), Some(now));
    }

    #[tokio::test(start_paused = true)]
    async fn fragments_are_chained_back_to_back() {
        let (sink, mut p) = scheduler(1);
        let t0 = Instant::now();
        p.enqueue("r1", fragment(), t0);
        p.enqueue("r1", fragment(), t0 + Duration::from_millis(20));
        p.enqueue("r1", fragment(), t0 + Duration::from_millis(40));

        let starts: Vec<Instant> = sink.scheduled.lock().unwrap().iter().map(|s| s.1).collect();
        assert_eq!(
            starts,
            vec![
                t0,
                t0 + Duration::from_millis(100),
                t0 + Duration::from_millis(200)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_fragment_starts_now_not_in_the_past() {
        let (sink, mut p) = scheduler(1);
        let t0 = Instant::now();
        p.enqueue("r1", fragment(), t0);
        let late = t0 + Duration::from_millis(500);
        p.enqueue("r1", fragment(), late);
        assert_eq!(sink.scheduled.lock().unwrap()[1].1, late);
    }

    #[tokio::test(start_paused = true)]
    async fn short_turn_flushes_on_finish() {
        let (sink, mut p) = scheduler(3);
        let now = Instant::now();
        p.enqueue("r1", fragment(), now);
        let end = p.finish("r1", now).expect("turn had audio");
        assert_eq!(sink.scheduled.lock().unwrap().len(), 1);
        assert_eq!(end, now + Duration::from_millis(100));
        assert!(!p.is_drained(now));
        assert!(p.is_drained(end));
        assert!(p.release_if_drained(end));
        assert!(p.current_turn().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finish_without_audio_returns_none() {
        let (_, mut p) = scheduler(3);
        assert!(p.finish("r1", Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_stops_sink_and_drops_late_fragments() {
        let (sink, mut p) = scheduler(1);
        let t0 = Instant::now();
        for _ in 0..5 {
            p.enqueue("r1", fragment(), t0);
        }
        let cut = p
            .interrupt(t0 + Duration::from_millis(250))
            .expect("turn was playing");
        assert_eq!(cut.turn_id, "r1");
        assert_eq!(cut.elapsed, Duration::from_millis(250));
        assert_eq!(cut.scheduled, Duration::from_millis(500));
        assert_eq!(*sink.stops.lock().unwrap(), 1);

        assert_eq!(p.enqueue("r1", fragment(), t0), Enqueued::Dropped);
        assert_eq!(sink.scheduled.lock().unwrap().len(), 5);
        assert!(p.interrupt(t0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_turn_marked_interrupted_drops_its_audio() {
        let (sink, mut p) = scheduler(1);
        let now = Instant::now();
        p.mark_interrupted("r1");
        p.mark_interrupted("r1");
        assert_eq!(p.enqueue("r1", fragment(), now), Enqueued::Dropped);
        assert!(sink.scheduled.lock().unwrap().is_empty());
        assert!(p.current_turn().is_none());
        assert_eq!(p.enqueue("r2", fragment(), now), Enqueued::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn new_turn_after_interrupt_plays_immediately() {
        let (sink, mut p) = scheduler(1);
        let t0 = Instant::now();
        p.enqueue("r1", fragment(), t0);
        p.enqueue("r1", fragment(), t0);
        let t1 = t0 + Duration::from_millis(50);
        p.interrupt(t1);
        assert_eq!(p.enqueue("r2", fragment(), t1), Enqueued::Scheduled);
        assert_eq!(sink.scheduled.lock().unwrap().last().map(|s| s.1), Some(t1));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forgets_everything() {
        let (sink, mut p) = scheduler(1);
        let now = Instant::now();
        p.enqueue("r1", fragment(), now);
        p.interrupt(now);
        p.reset();
        assert_eq!(*sink.stops.lock().unwrap(), 2);
        assert!(p.current_turn().is_none());
        assert!(p.playing_until(now).is_none());
        // interrupted ids are forgotten too
        assert_eq!(p.enqueue("r1", fragment(), now), Enqueued::Scheduled);
    }
}
