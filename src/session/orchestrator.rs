//! Session orchestrator: one duplex voice conversation with the realtime
//! endpoint.
//!
//! [`VoiceSession`] ties the pieces together:
//!
//! ```text
//!  mic ─▶ CapturePipeline ─▶ forwarder task ─▶ input_audio_buffer.append ─┐
//!              │                                                           ▼
//!              └─▶ recent_input ring ─▶ barge-in monitor            WebSocket
//!                                                                          │
//!  speaker ◀─ PlaybackScheduler ◀─ response.audio.delta ◀── supervisor ◀───┘
//!                                   function calls ─▶ CorrelationRegistry
//!                                   response.done ─▶ OperationCatalog
//!                                        ├─ inline ─────────────▶ InjectionQueue
//!                                        └─ forward ─▶ specialist ─▶ InjectionQueue
//!  InjectionQueue ─▶ delivery task (waits for a quiet floor) ─▶ WebSocket
//! ```
//!
//! All turn, playback and flag state lives in one `Core` behind a std
//! mutex that is never held across an `.await`.  The correlation registry,
//! outstanding operations and injection queue synchronise themselves.
//! Every change to the host-visible flags is published as a
//! [`SessionStatus`] on a `watch` channel.
//!
//! Background tasks hold the session alive; call [`VoiceSession::stop`]
//! before dropping the last handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::barge_in::BargeInDetector;
use super::reconnect::{ReconnectPolicy, ReconnectTracker};
use super::state::{SessionState, SessionStatus, StateMachine};
use super::turn::TurnTracker;
use crate::audio::{
    decode_base64, encode_base64, rms, CaptureDevice, CaptureError, CapturePipeline, Enqueued,
    PlaybackScheduler, PlaybackSink, RingBuffer, WireFormat,
};
use crate::config::AppConfig;
use crate::filler::{self, AnnotationStrategy, NetworkActivity};
use crate::injection::{
    run_delivery, run_timeout_sweep, Delivered, InjectionEntry, InjectionError, InjectionQueue,
    InjectionTarget, OutstandingOp, OutstandingOps,
};
use crate::invocation::{CorrelationRegistry, Execution, OperationCatalog, ReadyInvocation};
use crate::protocol::{
    ClientMessage, Connector, ItemInfo, ProtocolError, ResponseInfo, ServerEvent, SessionUpdate,
    TransportError,
};
use crate::specialist::{DispatchOutcome, SpecialistNetwork, SpecialistRequest};

/// How often the filler task looks for a due annotation.
const FILLER_TICK: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("audio hardware: {0}")]
    Hardware(#[from] CaptureError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("session is already running")]
    AlreadyRunning,
}

/// Host hooks.  Called from session tasks; keep them quick.
pub trait SessionObserver: Send + Sync {
    /// A function call is about to be executed.
    fn on_invocation(&self, _name: &str, _arguments: &Value) {}

    /// Transcript of what the human said.
    fn on_user_transcript(&self, _text: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// External collaborators of a session.
pub struct SessionDeps {
    pub connector: Arc<dyn Connector>,
    pub capture: Arc<dyn CaptureDevice>,
    pub playback: Arc<dyn PlaybackSink>,
    pub specialist: Arc<dyn SpecialistNetwork>,
    pub observer: Arc<dyn SessionObserver>,
}

// ---------------------------------------------------------------------------
// Core (guarded state)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tasks {
    supervisor: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
    delivery: Option<JoinHandle<()>>,
    sweep: Option<JoinHandle<()>>,
    filler: Option<JoinHandle<()>>,
    barge_in: Option<JoinHandle<()>>,
    drain: Option<JoinHandle<()>>,
    dispatches: Vec<JoinHandle<()>>,
}

impl Tasks {
    fn abort_speech_timers(&mut self) {
        for handle in [self.barge_in.take(), self.drain.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    fn abort_all(&mut self) {
        self.abort_speech_timers();
        let singles = [
            self.supervisor.take(),
            self.forwarder.take(),
            self.delivery.take(),
            self.sweep.take(),
            self.filler.take(),
        ];
        for handle in singles.into_iter().flatten() {
            handle.abort();
        }
        for handle in self.dispatches.drain(..) {
            handle.abort();
        }
    }
}

fn replace_task(slot: &mut Option<JoinHandle<()>>, handle: JoinHandle<()>) {
    if let Some(old) = slot.replace(handle) {
        old.abort();
    }
}

struct Core {
    machine: StateMachine,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    /// Bumped by every start and stop; a connect that finishes under an
    /// older run is discarded.
    run: u64,
    manual_stop: bool,
    capture: CapturePipeline,
    recent_input: RingBuffer<f32>,
    playback: PlaybackScheduler,
    turns: TurnTracker,
    speaking: bool,
    /// Bumped whenever speaking starts or is cut short; stale timers compare
    /// against it.
    speaking_epoch: u64,
    listening: bool,
    last_error: Option<String>,
    reconnect_attempt: u32,
    conversation_token: String,
    filler: Box<dyn AnnotationStrategy>,
    tasks: Tasks,
}

impl Core {
    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.machine.state(),
            listening: self.listening,
            speaking: self.speaking,
            muted: self.capture.is_muted(),
            recording: self.capture.is_recording(),
            last_error: self.last_error.clone(),
            reconnect_attempt: self.reconnect_attempt,
        }
    }

    fn floor_is_quiet(&self) -> bool {
        self.machine.state() == SessionState::Connected && !self.speaking && !self.listening
    }

    fn send(&self, msg: ClientMessage) -> bool {
        let kind = msg.kind();
        match &self.outbound {
            Some(out) => {
                if out.send(msg).is_err() {
                    log::warn!("session: socket closed, {kind} not sent");
                    return false;
                }
                true
            }
            None => {
                log::debug!("session: not connected, {kind} not sent");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

struct Inner {
    config: AppConfig,
    deps: SessionDeps,
    catalog: OperationCatalog,
    detector: BargeInDetector,
    registry: CorrelationRegistry,
    outstanding: Arc<OutstandingOps>,
    queue: Arc<InjectionQueue>,
    status_tx: watch::Sender<SessionStatus>,
    core: Mutex<Core>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, core: &Core) {
        let next = core.status();
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn enter(&self, core: &mut Core, state: SessionState) -> bool {
        match core.machine.transition(state) {
            Ok(()) => true,
            Err(e) => {
                log::error!("session: {e}");
                false
            }
        }
    }

    fn session_update(&self) -> ClientMessage {
        ClientMessage::SessionUpdate {
            session: SessionUpdate::from_config(&self.config.session, &self.config.audio),
        }
    }

    /// Take a freshly opened socket into use and announce the session.
    fn attach(&self, core: &mut Core, outbound: mpsc::UnboundedSender<ClientMessage>) {
        core.outbound = Some(outbound);
        self.enter(core, SessionState::Connected);
        core.send(self.session_update());
    }

    /// Forget everything tied to the current socket.
    fn drop_connection(&self, core: &mut Core) {
        core.outbound = None;
        core.playback.reset();
        core.turns.reset();
        core.speaking = false;
        core.listening = false;
        core.speaking_epoch += 1;
        core.tasks.abort_speech_timers();
        self.registry.clear();
    }

    fn spawn_forwarder(
        self: &Arc<Self>,
        core: &mut Core,
        frames: mpsc::UnboundedReceiver<Vec<f32>>,
    ) {
        let handle = tokio::spawn(Arc::clone(self).forward_frames(frames));
        replace_task(&mut core.tasks.forwarder, handle);
    }

    // -- tasks -------------------------------------------------------------

    async fn forward_frames(self: Arc<Self>, mut frames: mpsc::UnboundedReceiver<Vec<f32>>) {
        while let Some(frame) = frames.recv().await {
            let outbound = {
                let mut core = self.lock();
                if core.capture.is_muted() {
                    continue;
                }
                core.recent_input.push_slice(&frame);
                if core.machine.state() != SessionState::Connected {
                    continue;
                }
                core.outbound.clone()
            };
            if let Some(out) = outbound {
                let _ = out.send(ClientMessage::AppendAudio {
                    audio: encode_base64(&frame),
                });
            }
        }
        log::debug!("session: capture frames ended");
    }

    async fn supervise(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<Result<ServerEvent, ProtocolError>>,
    ) {
        let mut tracker =
            ReconnectTracker::new(ReconnectPolicy::from_config(&self.config.reconnect));
        loop {
            while let Some(event) = inbound.recv().await {
                match event {
                    Ok(event) => self.handle_event(event),
                    Err(e) => log::warn!("session: ignoring undecodable event: {e}"),
                }
            }

            {
                let mut core = self.lock();
                if core.manual_stop {
                    return;
                }
                log::warn!("session: connection lost");
                self.drop_connection(&mut core);
                self.enter(&mut core, SessionState::Connecting);
                self.publish(&core);
            }

            inbound = match self.reconnect(&mut tracker).await {
                Some(inbound) => inbound,
                None => return,
            };
        }
    }

    /// Retry until a connection is open or the attempts run out.
    async fn reconnect(
        self: &Arc<Self>,
        tracker: &mut ReconnectTracker,
    ) -> Option<mpsc::UnboundedReceiver<Result<ServerEvent, ProtocolError>>> {
        loop {
            let Some((attempt, delay)) = tracker.next_attempt() else {
                let mut core = self.lock();
                let msg = format!(
                    "connection lost; gave up after {} reconnect attempts",
                    tracker.max_attempts()
                );
                log::error!("session: {msg}");
                core.last_error = Some(msg);
                core.reconnect_attempt = 0;
                core.capture.stop();
                if let Some(handle) = core.tasks.forwarder.take() {
                    handle.abort();
                }
                self.enter(&mut core, SessionState::Error);
                self.publish(&core);
                return None;
            };

            {
                let mut core = self.lock();
                core.reconnect_attempt = attempt;
                self.publish(&core);
            }
            log::info!(
                "session: reconnect attempt {attempt}/{} in {delay:?}",
                tracker.max_attempts()
            );
            tokio::time::sleep(delay).await;

            match self.deps.connector.connect().await {
                Ok(conn) => {
                    let mut core = self.lock();
                    if core.manual_stop {
                        return None;
                    }
                    self.attach(&mut core, conn.outbound);
                    core.reconnect_attempt = 0;
                    core.last_error = None;
                    tracker.reset();
                    match core.capture.resume() {
                        Ok(Some(frames)) => self.spawn_forwarder(&mut core, frames),
                        Ok(None) => {}
                        Err(e) => {
                            log::error!("session: capture could not resume: {e}");
                            core.last_error = Some(e.to_string());
                        }
                    }
                    self.publish(&core);
                    return Some(conn.inbound);
                }
                Err(e) => {
                    log::warn!("session: reconnect attempt {attempt} failed: {e}");
                    let mut core = self.lock();
                    core.last_error = Some(e.to_string());
                    self.publish(&core);
                }
            }
        }
    }

    async fn monitor_barge_in(self: Arc<Self>, epoch: u64) {
        tokio::time::sleep(self.detector.grace).await;
        let mut ticker = tokio::time::interval(self.detector.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let done = {
                let mut core = self.lock();
                if !core.speaking || core.speaking_epoch != epoch {
                    true
                } else {
                    let recent = core.recent_input.latest(self.detector.window);
                    if self.detector.is_interruption(&recent) {
                        log::info!("session: barge-in (rms {:.3})", rms(&recent));
                        self.interrupt_locked(&mut core);
                        true
                    } else {
                        false
                    }
                }
            };
            if done {
                return;
            }
        }
    }

    /// Clear "speaking" once the finished turn's audio has played out.
    async fn await_drain(self: Arc<Self>, epoch: u64, mut deadline: Instant) {
        loop {
            tokio::time::sleep_until(deadline).await;
            let next = {
                let mut core = self.lock();
                if core.speaking_epoch != epoch {
                    return;
                }
                let now = Instant::now();
                if core.playback.release_if_drained(now) {
                    core.turns.release();
                    core.speaking = false;
                    if let Some(monitor) = core.tasks.barge_in.take() {
                        monitor.abort();
                    }
                    log::debug!("session: assistant finished speaking");
                    self.publish(&core);
                    None
                } else {
                    core.playback.playing_until(now)
                }
            };
            match next {
                Some(later) => deadline = later,
                None => return,
            }
        }
    }

    async fn dispatch(self: Arc<Self>, call_id: String, request: SpecialistRequest) {
        log::info!("session: forwarding {call_id} to the specialist network");
        match self.deps.specialist.dispatch(request).await {
            Ok(DispatchOutcome::Accepted) => {
                log::debug!("session: {call_id} accepted, result will follow");
            }
            Ok(DispatchOutcome::Completed(text)) => {
                let _ = self.complete_external(&call_id, Ok(text));
            }
            Err(e) => {
                log::warn!("session: dispatch of {call_id} failed: {e}");
                let _ = self.complete_external(&call_id, Err(e.to_string()));
            }
        }
    }

    async fn run_filler(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(FILLER_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            {
                let mut core = self.lock();
                self.maybe_annotate(&mut core, Instant::now());
            }
        }
    }

    // -- event handling ----------------------------------------------------

    fn handle_event(self: &Arc<Self>, event: ServerEvent) {
        let mut core = self.lock();
        match event {
            ServerEvent::SessionCreated { session } => {
                if let Some(id) = session.id {
                    log::debug!("session: remote session {id}");
                    core.conversation_token = id;
                }
            }
            ServerEvent::SessionUpdated { .. } => log::debug!("session: configuration accepted"),
            ServerEvent::ResponseCreated { response } => core.turns.begin(&response.id),
            ServerEvent::OutputItemAdded { response_id, item } => {
                self.note_item(&mut core, Some(&response_id), &item);
            }
            ServerEvent::ItemCreated { item, .. } => self.note_item(&mut core, None, &item),
            ServerEvent::AudioDelta {
                response_id,
                item_id,
                delta,
            } => self.on_audio(&mut core, &response_id, &item_id, &delta),
            ServerEvent::ArgumentsDelta {
                item_id,
                call_id,
                delta,
            } => self
                .registry
                .append_arguments(&call_id, item_id.as_deref(), &delta),
            ServerEvent::ArgumentsDone {
                item_id,
                call_id,
                name,
                arguments,
            } => self.registry.complete_arguments(
                &call_id,
                name.as_deref(),
                item_id.as_deref(),
                &arguments,
            ),
            ServerEvent::ResponseDone { response } => {
                let invoked = self.on_response_done(&mut core, &response);
                drop(core);
                for (name, arguments) in invoked {
                    self.deps.observer.on_invocation(&name, &arguments);
                }
            }
            ServerEvent::SpeechStarted { .. } => {
                core.listening = true;
                self.publish(&core);
            }
            ServerEvent::SpeechStopped { .. } => {
                core.listening = false;
                self.publish(&core);
            }
            ServerEvent::InputCommitted { item_id } => {
                log::debug!("session: input committed as {item_id}");
            }
            ServerEvent::InputTranscript { transcript, .. } => {
                drop(core);
                self.deps.observer.on_user_transcript(&transcript);
            }
            ServerEvent::Truncated {
                item_id,
                audio_end_ms,
            } => log::debug!("session: {item_id} truncated at {audio_end_ms} ms"),
            ServerEvent::Error { error } => {
                log::warn!(
                    "session: remote error {}: {}",
                    error.code.as_deref().unwrap_or("-"),
                    error.message
                );
                // A refused response.create never produces response.created.
                if core.turns.abandon_request() {
                    log::debug!("session: pending response request abandoned");
                }
            }
            ServerEvent::Unknown => {}
        }
    }

    fn note_item(&self, core: &mut Core, response_id: Option<&str>, item: &ItemInfo) {
        if item.is_function_call() {
            match item.call_id.as_deref() {
                Some(call_id) => {
                    self.registry
                        .announce(call_id, item.name.as_deref(), &item.id)
                }
                None => log::warn!("session: function call item {} has no call id", item.id),
            }
        } else if item.is_assistant_message() {
            let turn_id = match response_id {
                Some(id) => Some(id.to_owned()),
                None => core.turns.current().map(|t| t.id.clone()),
            };
            if let Some(turn_id) = turn_id {
                core.turns.note_assistant_item(&turn_id, &item.id);
            }
        }
    }

    fn on_audio(self: &Arc<Self>, core: &mut Core, turn_id: &str, item_id: &str, delta: &str) {
        let samples = match decode_base64(delta) {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("session: undecodable audio fragment: {e}");
                return;
            }
        };
        core.turns.note_assistant_item(turn_id, item_id);
        if core.playback.enqueue(turn_id, samples, Instant::now()) == Enqueued::Dropped {
            return;
        }
        if core.speaking {
            return;
        }

        core.speaking = true;
        core.speaking_epoch += 1;
        core.recent_input.clear();
        if self.config.barge_in.enabled {
            let handle = tokio::spawn(Arc::clone(self).monitor_barge_in(core.speaking_epoch));
            replace_task(&mut core.tasks.barge_in, handle);
        }
        self.publish(core);
    }

    /// Returns the invocations executed, for the observer to hear about once
    /// the core lock is released.
    fn on_response_done(
        self: &Arc<Self>,
        core: &mut Core,
        response: &ResponseInfo,
    ) -> Vec<(String, Value)> {
        core.turns.complete(&response.id);

        let (ready, discarded) = self.registry.take_ready();
        for dropped in discarded {
            log::warn!("session: dropping function call: {dropped:?}");
        }
        let mut invoked = Vec::with_capacity(ready.len());
        for call in ready {
            invoked.push((call.name.clone(), call.arguments.clone()));
            self.execute(core, call);
        }

        match core.playback.finish(&response.id, Instant::now()) {
            Some(deadline) => {
                let handle =
                    tokio::spawn(Arc::clone(self).await_drain(core.speaking_epoch, deadline));
                replace_task(&mut core.tasks.drain, handle);
            }
            None => {
                if core.turns.current().is_some_and(|t| t.id == response.id) {
                    core.turns.release();
                }
            }
        }
        invoked
    }

    fn execute(self: &Arc<Self>, core: &mut Core, call: ReadyInvocation) {
        match self.catalog.plan(&call) {
            Execution::Inline {
                call_id,
                anchor,
                output,
            } => {
                log::info!("session: answering {call_id} ({}) locally", call.name);
                self.queue.push(InjectionEntry::new(call_id, anchor, output));
            }
            Execution::Forward {
                call_id,
                anchor,
                operation,
                request,
            } => {
                let now = Instant::now();
                self.outstanding.insert(OutstandingOp {
                    call_id: call_id.clone(),
                    anchor,
                    operation: operation.clone(),
                    dispatched_at: now,
                });
                core.filler.on_invocation_dispatched(&call_id, &operation, now);
                let request = SpecialistRequest {
                    request,
                    correlation_token: call_id.clone(),
                    conversation_token: core.conversation_token.clone(),
                };
                let handle = tokio::spawn(Arc::clone(self).dispatch(call_id, request));
                core.tasks.dispatches.retain(|h| !h.is_finished());
                core.tasks.dispatches.push(handle);
            }
        }
    }

    fn complete_external(
        &self,
        call_id: &str,
        result: Result<String, String>,
    ) -> Result<(), InjectionError> {
        let Some(op) = self.outstanding.resolve(call_id) else {
            log::warn!("injection: no outstanding operation for {call_id}, result dropped");
            return Err(InjectionError::NoMatchingOperation(call_id.to_owned()));
        };
        self.lock().filler.on_invocation_resolved(call_id);
        let entry = match result {
            Ok(text) => InjectionEntry::success(op.call_id, op.anchor, &text),
            Err(error) => InjectionEntry::failure(op.call_id, op.anchor, &error),
        };
        self.queue.push(entry);
        Ok(())
    }

    /// Cut the assistant off.  Returns whether there was anything to cut.
    fn interrupt_locked(&self, core: &mut Core) -> bool {
        let cut = core.playback.interrupt(Instant::now());
        let turn = core.turns.release();
        let generating = turn.as_ref().is_some_and(|t| t.active);
        if cut.is_none() && !generating {
            return false;
        }
        if let Some(turn) = &turn {
            core.playback.mark_interrupted(&turn.id);
        }

        if let (Some(cut), Some(item_id)) = (&cut, turn.and_then(|t| t.assistant_item_id)) {
            let audio_end_ms = self.detector.truncation_point_ms(cut.elapsed, cut.scheduled);
            core.send(ClientMessage::Truncate {
                item_id,
                content_index: 0,
                audio_end_ms,
            });
        }
        core.send(ClientMessage::CancelResponse);

        core.speaking = false;
        core.speaking_epoch += 1;
        core.tasks.abort_speech_timers();
        self.publish(core);
        true
    }

    fn maybe_annotate(&self, core: &mut Core, now: Instant) -> bool {
        if !core.floor_is_quiet()
            || core.turns.is_active()
            || core.turns.response_requested()
            || !self.queue.is_empty()
            || self.outstanding.is_empty()
            || !core.filler.should_annotate(now)
        {
            return false;
        }
        let Some(text) = core.filler.next_annotation(now) else {
            return false;
        };
        if !core.turns.request_response() {
            return false;
        }
        log::info!("filler: {} -> \"{text}\"", core.filler.name());
        core.send(ClientMessage::create_response_with(format!(
            "Briefly tell the user, in one short sentence: {text}"
        )))
    }
}

impl InjectionTarget for Inner {
    fn inject(&self, entry: &InjectionEntry) -> Result<Delivered, InjectionError> {
        let mut core = self.lock();
        match core.machine.state() {
            SessionState::Connected => {}
            SessionState::Connecting => return Err(InjectionError::Busy),
            _ => return Err(InjectionError::NotConnected),
        }
        if !core.floor_is_quiet() {
            return Err(InjectionError::Busy);
        }
        let out = core.outbound.clone().ok_or(InjectionError::NotConnected)?;
        out.send(ClientMessage::function_output(
            &entry.call_id,
            entry.anchor.as_deref(),
            &entry.output,
        ))
        .map_err(|_| InjectionError::SocketClosed)?;

        let response_requested = core.turns.request_response();
        if response_requested {
            out.send(ClientMessage::create_response())
                .map_err(|_| InjectionError::SocketClosed)?;
        }
        Ok(Delivered { response_requested })
    }

    fn delivery_failed(&self, entry: &InjectionEntry, error: &InjectionError) {
        let mut core = self.lock();
        core.last_error = Some(format!("result for {} not delivered: {error}", entry.call_id));
        self.publish(&core);
    }
}

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// Handle to one voice session.  Cheap to clone.
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<Inner>,
}

impl VoiceSession {
    pub fn new(config: AppConfig, deps: SessionDeps) -> Self {
        let detector = BargeInDetector::from_config(&config.barge_in);
        let format = WireFormat {
            sample_rate: config.audio.sample_rate,
            frame_samples: config.audio.frame_samples,
        };
        let core = Core {
            machine: StateMachine::new(),
            outbound: None,
            run: 0,
            manual_stop: false,
            capture: CapturePipeline::new(Arc::clone(&deps.capture), format),
            recent_input: RingBuffer::new(detector.window),
            playback: PlaybackScheduler::new(
                Arc::clone(&deps.playback),
                config.audio.sample_rate,
                config.audio.warmup_fragments,
            ),
            turns: TurnTracker::new(),
            speaking: false,
            speaking_epoch: 0,
            listening: false,
            last_error: None,
            reconnect_attempt: 0,
            conversation_token: String::new(),
            filler: filler::from_config(&config.filler),
            tasks: Tasks::default(),
        };
        let (status_tx, _) = watch::channel(core.status());
        Self {
            inner: Arc::new(Inner {
                catalog: OperationCatalog::new(&config.session.operations),
                detector,
                registry: CorrelationRegistry::new(),
                outstanding: Arc::new(OutstandingOps::new()),
                queue: Arc::new(InjectionQueue::new()),
                status_tx,
                core: Mutex::new(core),
                deps,
                config,
            }),
        }
    }

    /// Open the microphone, connect and announce the session.
    ///
    /// A hardware failure leaves the session in `Error` without connecting.
    /// A failure of this first connect is terminal as well; only a
    /// connection that was once established is retried.
    pub async fn start(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let run = {
            let mut core = inner.lock();
            if core.machine.state().is_live() {
                return Err(SessionError::AlreadyRunning);
            }
            core.run += 1;
            core.manual_stop = false;
            core.last_error = None;
            core.reconnect_attempt = 0;

            match core.capture.start() {
                Ok(Some(frames)) => inner.spawn_forwarder(&mut core, frames),
                Ok(None) => {}
                Err(e) => {
                    log::error!("session: cannot open microphone: {e}");
                    core.last_error = Some(e.to_string());
                    inner.enter(&mut core, SessionState::Error);
                    inner.publish(&core);
                    return Err(e.into());
                }
            }
            inner.enter(&mut core, SessionState::Connecting);
            inner.publish(&core);
            core.run
        };

        let result = inner.deps.connector.connect().await;

        let mut core = inner.lock();
        if core.run != run || core.manual_stop {
            log::debug!("session: stopped while connecting");
            return Ok(());
        }
        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("session: connect failed: {e}");
                core.last_error = Some(e.to_string());
                core.capture.stop();
                if let Some(handle) = core.tasks.forwarder.take() {
                    handle.abort();
                }
                inner.enter(&mut core, SessionState::Error);
                inner.publish(&core);
                return Err(e.into());
            }
        };

        inner.attach(&mut core, conn.outbound);
        let supervisor = tokio::spawn(Arc::clone(inner).supervise(conn.inbound));
        replace_task(&mut core.tasks.supervisor, supervisor);

        let grace = Duration::from_millis(inner.config.injection.grace_ms);
        let delivery = tokio::spawn(run_delivery(
            Arc::clone(&inner.queue),
            inner.status_tx.subscribe(),
            Arc::clone(inner),
            grace,
        ));
        replace_task(&mut core.tasks.delivery, delivery);

        let sweep = tokio::spawn(run_timeout_sweep(
            Arc::clone(&inner.outstanding),
            Arc::clone(&inner.queue),
            Duration::from_secs(inner.config.injection.sweep_interval_secs),
            Duration::from_secs(inner.config.injection.timeout_secs),
        ));
        replace_task(&mut core.tasks.sweep, sweep);

        if inner.config.filler.speak {
            let filler = tokio::spawn(Arc::clone(inner).run_filler());
            replace_task(&mut core.tasks.filler, filler);
        }

        inner.publish(&core);
        log::info!("session: started");
        Ok(())
    }

    /// Tear everything down.  Safe to call repeatedly and from any state.
    pub fn stop(&self) {
        let inner = &self.inner;
        let mut core = inner.lock();
        let was_active = core.machine.state() != SessionState::Disconnected
            || core.capture.is_recording();
        core.run += 1;
        core.manual_stop = true;
        core.tasks.abort_all();
        inner.drop_connection(&mut core);
        core.capture.stop();
        inner.outstanding.clear();
        inner.queue.clear();
        core.filler = filler::from_config(&inner.config.filler);
        core.reconnect_attempt = 0;
        inner.enter(&mut core, SessionState::Disconnected);
        inner.publish(&core);
        if was_active {
            log::info!("session: stopped");
        }
    }

    /// Flip the microphone mute flag; returns the new value.
    pub fn toggle_mute(&self) -> bool {
        let mut core = self.inner.lock();
        let muted = core.capture.toggle_mute();
        self.inner.publish(&core);
        muted
    }

    pub fn set_muted(&self, muted: bool) {
        let mut core = self.inner.lock();
        core.capture.set_muted(muted);
        self.inner.publish(&core);
    }

    /// Reopen the microphone of a running session.
    pub fn start_recording(&self) -> Result<(), SessionError> {
        let mut core = self.inner.lock();
        let started = core.capture.start();
        let result = match started {
            Ok(Some(frames)) => {
                self.inner.spawn_forwarder(&mut core, frames);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                core.last_error = Some(e.to_string());
                Err(e.into())
            }
        };
        self.inner.publish(&core);
        result
    }

    /// Release the microphone; the connection stays up.
    pub fn stop_recording(&self) {
        let mut core = self.inner.lock();
        core.capture.stop();
        if let Some(handle) = core.tasks.forwarder.take() {
            handle.abort();
        }
        self.inner.publish(&core);
    }

    /// Stop the assistant mid-utterance, as a barge-in would.
    pub fn interrupt(&self) -> bool {
        let mut core = self.inner.lock();
        self.inner.interrupt_locked(&mut core)
    }

    /// Result of a forwarded operation that was accepted for later delivery.
    ///
    /// `Err` carries a failure description that is narrated like a result.
    pub fn deliver_external_result(
        &self,
        call_id: &str,
        result: Result<String, String>,
    ) -> Result<(), InjectionError> {
        self.inner.complete_external(call_id, result)
    }

    /// Feed an event from the specialist network to the filler strategy.
    pub fn report_network_activity(&self, activity: NetworkActivity) {
        self.inner
            .lock()
            .filler
            .on_network_activity(activity, Instant::now());
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Every state entered since construction.
    pub fn transition_log(&self) -> Vec<SessionState> {
        self.inner.lock().machine.history().to_vec()
    }

    /// Forwarded operations still waiting for a result.
    pub fn outstanding_operations(&self) -> usize {
        self.inner.outstanding.len()
    }

    /// Results waiting for a quiet floor.
    pub fn pending_results(&self) -> usize {
        self.inner.queue.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
