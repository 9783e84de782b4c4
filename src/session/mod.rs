//! The voice session: connection lifecycle, turns, barge-in and the
//! orchestration of capture, playback, function calls and result injection.

pub mod barge_in;
pub mod orchestrator;
pub mod reconnect;
pub mod state;
pub mod turn;

#[cfg(test)]
pub(crate) mod testing;

pub use barge_in::BargeInDetector;
pub use orchestrator::{NoopObserver, SessionDeps, SessionError, SessionObserver, VoiceSession};
pub use reconnect::{ReconnectPolicy, ReconnectTracker};
pub use state::{SessionState, SessionStatus, StateMachine, TransitionError};
pub use turn::{Turn, TurnTracker};
