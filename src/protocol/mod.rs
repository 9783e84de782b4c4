//! Realtime endpoint wire protocol: typed client/server events and the
//! WebSocket transport that carries them.

pub mod client;
pub mod server;
pub mod transport;

use thiserror::Error;

pub use client::{ClientMessage, ConversationItem, SessionUpdate};
pub use server::{ItemInfo, ResponseInfo, ServerEvent};
pub use transport::{Connection, Connector, TransportError, WebSocketConnector};

/// A frame arrived that the session cannot interpret.  Logged and skipped;
/// never fatal to the session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unexpected binary frame ({0} bytes)")]
    UnexpectedBinary(usize),

    #[error("undecodable audio payload: {0}")]
    Audio(#[from] base64::DecodeError),
}
