//! Correlation of streamed function-call fragments.
//!
//! A single response may announce several function calls and stream their
//! argument text in interleaved fragments.  Everything is keyed by the
//! remote `call_id`; nothing is executed until the response that carried
//! the calls is done, and then only calls whose arguments were completed
//! and parse as JSON.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

/// One call being assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInvocation {
    pub call_id: String,
    pub name: Option<String>,
    /// Id of the function-call item; results are inserted after it.
    pub anchor: Option<String>,
    pub arguments: String,
    pub complete: bool,
    seq: u64,
}

/// A call ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyInvocation {
    pub call_id: String,
    pub name: String,
    pub anchor: Option<String>,
    pub arguments: Value,
}

/// Why a call was discarded instead of executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Discarded {
    /// Arguments never completed before the response ended.
    Incomplete { call_id: String },
    /// No operation name was ever seen for the call.
    Unnamed { call_id: String },
    /// Completed arguments were not valid JSON.
    BadArguments { call_id: String, error: String },
}

#[derive(Default)]
struct Entries {
    by_call: HashMap<String, PendingInvocation>,
    next_seq: u64,
}

impl Entries {
    fn entry(&mut self, call_id: &str) -> &mut PendingInvocation {
        let seq = self.next_seq;
        let slot = self
            .by_call
            .entry(call_id.to_owned())
            .or_insert_with(|| PendingInvocation {
                call_id: call_id.to_owned(),
                name: None,
                anchor: None,
                arguments: String::new(),
                complete: false,
                seq,
            });
        if slot.seq == seq {
            self.next_seq += 1;
        }
        slot
    }
}

/// Keyed, thread-safe store of calls in flight for the current response.
#[derive(Default)]
pub struct CorrelationRegistry {
    entries: Mutex<Entries>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that a call item exists.  Idempotent; fills in whatever was
    /// not known yet.
    pub fn announce(&self, call_id: &str, name: Option<&str>, item_id: &str) {
        let mut entries = self.lock();
        let slot = entries.entry(call_id);
        if slot.name.is_none() {
            slot.name = name.map(str::to_owned);
        }
        slot.anchor.get_or_insert_with(|| item_id.to_owned());
    }

    /// Append one argument fragment.  Fragments for a call that was not
    /// announced yet create its entry.
    pub fn append_arguments(&self, call_id: &str, item_id: Option<&str>, fragment: &str) {
        let mut entries = self.lock();
        let slot = entries.entry(call_id);
        if slot.complete {
            log::warn!("session: argument fragment after completion for {call_id}, ignored");
            return;
        }
        if slot.anchor.is_none() {
            slot.anchor = item_id.map(str::to_owned);
        }
        slot.arguments.push_str(fragment);
    }

    /// The endpoint delivered the full argument text.  It replaces whatever
    /// fragments were collected.
    pub fn complete_arguments(
        &self,
        call_id: &str,
        name: Option<&str>,
        item_id: Option<&str>,
        arguments: &str,
    ) {
        let mut entries = self.lock();
        let slot = entries.entry(call_id);
        if slot.name.is_none() {
            slot.name = name.map(str::to_owned);
        }
        if slot.anchor.is_none() {
            slot.anchor = item_id.map(str::to_owned);
        }
        slot.arguments = arguments.to_owned();
        slot.complete = true;
    }

    /// Remove every entry.  Returns the calls that can execute, in the order
    /// they were first seen, plus those that had to be discarded.
    pub fn take_ready(&self) -> (Vec<ReadyInvocation>, Vec<Discarded>) {
        let mut drained: Vec<PendingInvocation> =
            self.lock().by_call.drain().map(|(_, v)| v).collect();
        drained.sort_by_key(|p| p.seq);

        let mut ready = Vec::new();
        let mut discarded = Vec::new();
        for pending in drained {
            let PendingInvocation {
                call_id,
                name,
                anchor,
                arguments,
                complete,
                ..
            } = pending;
            if !complete {
                discarded.push(Discarded::Incomplete { call_id });
                continue;
            }
            let Some(name) = name else {
                discarded.push(Discarded::Unnamed { call_id });
                continue;
            };
            let text = if arguments.trim().is_empty() { "{}" } else { arguments.as_str() };
            match serde_json::from_str::<Value>(text) {
                Ok(arguments) => ready.push(ReadyInvocation {
                    call_id,
                    name,
                    anchor,
                    arguments,
                }),
                Err(e) => discarded.push(Discarded::BadArguments {
                    call_id,
                    error: e.to_string(),
                }),
            }
        }
        (ready, discarded)
    }

    pub fn get(&self, call_id: &str) -> Option<PendingInvocation> {
        self.lock().by_call.get(call_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().by_call.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().by_call.clear();
    }
}
