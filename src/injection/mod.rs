//! Asynchronous result injection.
//!
//! Results of forwarded operations arrive at arbitrary times, often while
//! someone is talking.  They are queued and delivered into the conversation
//! only once the floor has been quiet for a grace period, each anchored
//! right after the function call that asked for it.  Operations that never
//! get an answer are resolved as failures by a timeout sweep.

pub mod delivery;
pub mod outstanding;
pub mod queue;

use thiserror::Error;

pub use delivery::{
    run_delivery, run_timeout_sweep, sweep_expired, ConversationFloor, Delivered,
    InjectionTarget,
};
pub use outstanding::{OutstandingOp, OutstandingOps};
pub use queue::{InjectionEntry, InjectionQueue};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InjectionError {
    /// Someone started speaking between the wait and the delivery attempt.
    #[error("conversation floor is taken")]
    Busy,

    #[error("session is not connected")]
    NotConnected,

    #[error("socket closed while delivering")]
    SocketClosed,

    #[error("no outstanding operation for call {0}")]
    NoMatchingOperation(String),
}
