//! In-memory doubles for driving a [`super::VoiceSession`] in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::SessionObserver;
use crate::audio::{CaptureDevice, CaptureError, CaptureHandle, PlaybackSink, WireFormat};
use crate::protocol::{
    ClientMessage, Connection, Connector, ProtocolError, ServerEvent, TransportError,
};
use crate::specialist::{DispatchOutcome, SpecialistError, SpecialistNetwork, SpecialistRequest};

/// Let spawned tasks run without advancing the clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// The endpoint's side of one scripted connection.  Dropping it closes the
/// connection as seen by the session.
pub struct RemoteEnd {
    events: mpsc::UnboundedSender<Result<ServerEvent, ProtocolError>>,
    client: mpsc::UnboundedReceiver<ClientMessage>,
}

impl RemoteEnd {
    pub fn send(&self, event: Value) {
        let event = ServerEvent::parse(&event.to_string()).expect("valid server event");
        self.events.send(Ok(event)).expect("session listening");
    }

    /// Everything the session sent since the last call.
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.client.try_recv() {
            out.push(msg);
        }
        out
    }

    /// [`RemoteEnd::drain`] without microphone traffic.
    pub fn drain_control(&mut self) -> Vec<ClientMessage> {
        self.drain()
            .into_iter()
            .filter(|m| !matches!(m, ClientMessage::AppendAudio { .. }))
            .collect()
    }
}

/// Accepts or refuses connections in script order; refuses once the script
/// runs out.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<bool>>,
    remotes: Mutex<VecDeque<RemoteEnd>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(script: &[bool]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The oldest accepted connection not taken yet.
    pub fn take_remote(&self) -> RemoteEnd {
        self.remotes
            .lock()
            .unwrap()
            .pop_front()
            .expect("an accepted connection")
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let accept = self.script.lock().unwrap().pop_front().unwrap_or(false);
        if !accept {
            return Err(TransportError::Connect("refused".into()));
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.remotes.lock().unwrap().push_back(RemoteEnd {
            events: in_tx,
            client: out_rx,
        });
        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    scheduled: Mutex<Vec<(usize, Instant)>>,
    stops: AtomicUsize,
}

impl RecordingSink {
    pub fn scheduled(&self) -> Vec<(usize, Instant)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl PlaybackSink for RecordingSink {
    fn schedule(&self, samples: &[f32], at: Instant) {
        self.scheduled.lock().unwrap().push((samples.len(), at));
    }

    fn stop_all(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Microphone whose frames are pushed by the test.
#[derive(Default)]
pub struct ManualCapture {
    pub fail: bool,
    frames: Mutex<Option<mpsc::UnboundedSender<Vec<f32>>>>,
    opens: AtomicUsize,
}

impl ManualCapture {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn push(&self, frame: Vec<f32>) {
        if let Some(tx) = self.frames.lock().unwrap().as_ref() {
            let _ = tx.send(frame);
        }
    }
}

impl CaptureDevice for ManualCapture {
    fn open(
        &self,
        _format: WireFormat,
        frames: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<CaptureHandle, CaptureError> {
        if self.fail {
            return Err(CaptureError::NoDevice);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.frames.lock().unwrap() = Some(frames);
        Ok(CaptureHandle::detached())
    }
}

// ---------------------------------------------------------------------------
// Specialist network / observer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum StubReply {
    Accept,
    Answer(String),
    Fail,
}

pub struct StubSpecialist {
    reply: StubReply,
    requests: Mutex<Vec<SpecialistRequest>>,
}

impl StubSpecialist {
    pub fn new(reply: StubReply) -> Self {
        Self {
            reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SpecialistRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpecialistNetwork for StubSpecialist {
    async fn dispatch(
        &self,
        request: SpecialistRequest,
    ) -> Result<DispatchOutcome, SpecialistError> {
        self.requests.lock().unwrap().push(request);
        match &self.reply {
            StubReply::Accept => Ok(DispatchOutcome::Accepted),
            StubReply::Answer(text) => Ok(DispatchOutcome::Completed(text.clone())),
            StubReply::Fail => Err(SpecialistError::Rejected(503)),
        }
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    invocations: Mutex<Vec<(String, Value)>>,
    transcripts: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn transcripts(&self) -> Vec<String> {
        self.transcripts.lock().unwrap().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_invocation(&self, name: &str, arguments: &Value) {
        self.invocations
            .lock()
            .unwrap()
            .push((name.to_owned(), arguments.clone()));
    }

    fn on_user_transcript(&self, text: &str) {
        self.transcripts.lock().unwrap().push(text.to_owned());
    }
}
