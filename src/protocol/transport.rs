//! WebSocket transport to the realtime endpoint.
//!
//! [`Connector::connect`] yields a [`Connection`]: an outbound channel of
//! [`ClientMessage`]s and an inbound channel of decoded [`ServerEvent`]s.
//! Two tasks sit behind it, one writing and one reading the split socket.
//! The inbound channel closing is the session's only signal that the socket
//! went away.  Dropping the outbound sender closes the socket.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::{ClientMessage, ProtocolError, ServerEvent};
use crate::config::EndpointConfig;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid endpoint request: {0}")]
    Request(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Auth(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Connect(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Connection / Connector
// ---------------------------------------------------------------------------

/// One live socket, as seen by the session.
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<Result<ServerEvent, ProtocolError>>,
}

/// Opens connections to the realtime endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, TransportError>;
}

// ---------------------------------------------------------------------------
// WebSocketConnector
// ---------------------------------------------------------------------------

pub struct WebSocketConnector {
    endpoint: EndpointConfig,
    http: reqwest::Client,
}

impl WebSocketConnector {
    pub fn new(endpoint: EndpointConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.connect_timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self { endpoint, http }
    }

    /// Full socket URL including the model query.
    pub fn socket_url(&self) -> String {
        let sep = if self.endpoint.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}model={}", self.endpoint.url, self.endpoint.model)
    }

    /// Ephemeral token from `token_url`, or the long-lived key from the
    /// configured environment variable.
    async fn resolve_token(&self) -> Result<String, TransportError> {
        match &self.endpoint.token_url {
            Some(url) => {
                let body: Value = self
                    .http
                    .post(url)
                    .json(&serde_json::json!({ "model": self.endpoint.model }))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                extract_token(&body).ok_or_else(|| {
                    TransportError::Auth(format!("token endpoint {url} returned no token"))
                })
            }
            None => std::env::var(&self.endpoint.api_key_env).map_err(|_| {
                TransportError::Auth(format!("{} is not set", self.endpoint.api_key_env))
            }),
        }
    }

    async fn open(&self) -> Result<Connection, TransportError> {
        let token = self.resolve_token().await?;

        let mut request = self
            .socket_url()
            .into_client_request()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Request(e.to_string()))?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        log::info!("session: socket open to {}", self.endpoint.url);

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<ServerEvent, ProtocolError>>();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("session: dropping unserialisable {}: {e}", msg.kind());
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    log::warn!("session: socket write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
            log::debug!("session: writer finished");
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let event = match frame {
                    Ok(Message::Text(text)) => ServerEvent::parse(&text),
                    Ok(Message::Binary(data)) => Err(ProtocolError::UnexpectedBinary(data.len())),
                    Ok(Message::Close(reason)) => {
                        log::info!("session: socket closed by peer: {reason:?}");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        log::warn!("session: socket read failed: {e}");
                        break;
                    }
                };
                if in_tx.send(event).is_err() {
                    break;
                }
            }
            log::debug!("session: reader finished");
        });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let limit = Duration::from_secs(self.endpoint.connect_timeout_secs.max(1));
        tokio::time::timeout(limit, self.open())
            .await
            .map_err(|_| TransportError::Timeout(limit))?
    }
}

/// Accepts `{"client_secret":{"value":…}}` as well as a flat `{"token":…}`.
fn extract_token(body: &Value) -> Option<String> {
    body.pointer("/client_secret/value")
        .or_else(|| body.get("token"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
