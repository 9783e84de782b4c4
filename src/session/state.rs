//! Session state machine and the status snapshot published to hosts.
//!
//! [`SessionState`] is the connection lifecycle.  Transitions go through
//! [`StateMachine::transition`], which rejects anything not in the table
//! below and keeps a log of every state entered.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──handshake ok──▶ Connected
//!                          │                            │
//!                          └──initial failure──▶ Error ◀┘ reconnects exhausted
//! Connected ──socket lost──▶ Connecting (reconnect attempts)
//! Error ──restart──▶ Connecting
//! any ──stop──▶ Disconnected
//! Disconnected ──hardware failure──▶ Error
//! ```
//!
//! [`SessionStatus`] bundles the state with the conversational sub-flags
//! (listening, speaking) and the capture flags; the session publishes a
//! fresh snapshot through a `tokio::sync::watch` channel after every change.

use thiserror::Error;

use crate::injection::ConversationFloor;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal until the user restarts.
    Error,
}

impl SessionState {
    /// `true` while a connection exists or is being established.
    ///
    /// ```
    /// use voice_bridge::session::SessionState;
    ///
    /// assert!(SessionState::Connecting.is_live());
    /// assert!(SessionState::Connected.is_live());
    /// assert!(!SessionState::Disconnected.is_live());
    /// assert!(!SessionState::Error.is_live());
    /// ```
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Error => "Error",
        }
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Error)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Connected, Connecting)
                | (Connected, Error)
                | (Connected, Disconnected)
                | (Error, Connecting)
                | (Error, Disconnected)
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Disconnected
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal session transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

// ---------------------------------------------------------------------------
// StateMachine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StateMachine {
    state: SessionState,
    log: Vec<SessionState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            log: vec![SessionState::Disconnected],
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`.  Re-entering the current state is a no-op.
    pub fn transition(&mut self, next: SessionState) -> Result<(), TransitionError> {
        if next == self.state {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        log::info!("session: {} -> {}", self.state.label(), next.label());
        self.state = next;
        self.log.push(next);
        Ok(())
    }

    /// Every state entered so far, starting with `Disconnected`.
    pub fn history(&self) -> &[SessionState] {
        &self.log
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Snapshot for hosts (UI, CLI, tests).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// The human is speaking (remote voice activity detection).
    pub listening: bool,
    /// Assistant audio is playing.
    pub speaking: bool,
    pub muted: bool,
    pub recording: bool,
    pub last_error: Option<String>,
    /// Current reconnection attempt, `0` when not reconnecting.
    pub reconnect_attempt: u32,
}

impl SessionStatus {
    pub fn connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        let mut parts = vec![self.state.label().to_owned()];
        if self.listening {
            parts.push("listening".into());
        }
        if self.speaking {
            parts.push("speaking".into());
        }
        if self.recording {
            parts.push(if self.muted { "mic muted" } else { "mic on" }.into());
        }
        if self.reconnect_attempt > 0 {
            parts.push(format!("reconnect #{}", self.reconnect_attempt));
        }
        if let Some(err) = &self.last_error {
            parts.push(format!("last error: {err}"));
        }
        parts.join(" | ")
    }
}

impl ConversationFloor for SessionStatus {
    fn is_quiet(&self) -> bool {
        self.connected() && !self.speaking && !self.listening
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_logged() {
        let mut m = StateMachine::new();
        m.transition(SessionState::Connecting).expect("connect");
        m.transition(SessionState::Connected).expect("open");
        m.transition(SessionState::Disconnected).expect("stop");
        assert_eq!(
            m.history(),
            &[
                SessionState::Disconnected,
                SessionState::Connecting,
                SessionState::Connected,
                SessionState::Disconnected
            ]
        );
    }

    #[test]
    fn illegal_transition_is_rejected_and_not_applied() {
        let mut m = StateMachine::new();
        let err = m.transition(SessionState::Connected).unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                from: SessionState::Disconnected,
                to: SessionState::Connected
            }
        );
        assert_eq!(m.state(), SessionState::Disconnected);
        assert_eq!(m.history().len(), 1);
    }

    #[test]
    fn error_cannot_jump_to_connected() {
        assert!(!SessionState::Error.can_transition_to(SessionState::Connected));
        assert!(SessionState::Error.can_transition_to(SessionState::Connecting));
    }

    #[test]
    fn same_state_is_noop() {
        let mut m = StateMachine::new();
        m.transition(SessionState::Disconnected).expect("noop");
        assert_eq!(m.history().len(), 1);
    }

    #[test]
    fn floor_is_quiet_only_when_connected_and_silent() {
        let mut s = SessionStatus {
            state: SessionState::Connected,
            ..SessionStatus::default()
        };
        assert!(s.is_quiet());
        s.speaking = true;
        assert!(!s.is_quiet());
        s.speaking = false;
        s.listening = true;
        assert!(!s.is_quiet());
        s.listening = false;
        s.state = SessionState::Connecting;
        assert!(!s.is_quiet());
    }

    #[test]
    fn summary_mentions_flags() {
        let s = SessionStatus {
            state: SessionState::Connected,
            speaking: true,
            recording: true,
            muted: true,
            ..SessionStatus::default()
        };
        assert_eq!(s.summary(), "Connected | speaking | mic muted");
    }
}
