//! Assistant turn bookkeeping.
//!
//! A turn is one remote response.  It is *active* from `response.created`
//! until `response.done`; its record is kept after that while its audio is
//! still playing, so that an interruption can still name the assistant item
//! to truncate.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: String,
    /// Assistant audio item, the target of truncation.
    pub assistant_item_id: Option<String>,
    /// Generation still in progress.
    pub active: bool,
}

#[derive(Debug, Default)]
pub struct TurnTracker {
    current: Option<Turn>,
    /// `response.create` was sent and no `response.created` seen yet.
    response_requested: bool,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `response.created`.  Replaces any previous record.
    pub fn begin(&mut self, id: &str) {
        if let Some(prev) = &self.current {
            if prev.active {
                log::warn!("session: turn {id} started while {} still active", prev.id);
            }
        }
        self.current = Some(Turn {
            id: id.to_owned(),
            assistant_item_id: None,
            active: true,
        });
        self.response_requested = false;
    }

    /// Remember the assistant item of `turn_id` if none is known yet.
    pub fn note_assistant_item(&mut self, turn_id: &str, item_id: &str) {
        if let Some(turn) = self.current.as_mut().filter(|t| t.id == turn_id) {
            turn.assistant_item_id.get_or_insert_with(|| item_id.to_owned());
        }
    }

    /// `response.done`.  Returns `false` for an unknown or stale id.
    pub fn complete(&mut self, id: &str) -> bool {
        match self.current.as_mut() {
            Some(turn) if turn.id == id => {
                turn.active = false;
                true
            }
            _ => false,
        }
    }

    /// Drop the record (audio drained, interrupted, or connection lost).
    pub fn release(&mut self) -> Option<Turn> {
        self.current.take()
    }

    pub fn current(&self) -> Option<&Turn> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.as_ref().is_some_and(|t| t.active)
    }

    pub fn response_requested(&self) -> bool {
        self.response_requested
    }

    /// Claim the right to send `response.create`.  Refused while a turn is
    /// active or another request is pending.
    pub fn request_response(&mut self) -> bool {
        if self.is_active() || self.response_requested {
            return false;
        }
        self.response_requested = true;
        true
    }

    /// The pending `response.create` was refused by the endpoint.  Returns
    /// whether a request was pending.
    pub fn abandon_request(&mut self) -> bool {
        std::mem::take(&mut self.response_requested)
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.response_requested = false;
    }
}
