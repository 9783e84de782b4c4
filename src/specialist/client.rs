//! `SpecialistNetwork` trait and its HTTP implementation.
//!
//! Forwarded operations are POSTed to `{base_url}/v1/requests` with the
//! request text and two correlation tokens.  The network either answers
//! inline (`200` with content) or accepts the work (`202`) and later hands
//! the result back to the session through
//! [`VoiceSession::deliver_external_result`](crate::session::VoiceSession::deliver_external_result).

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::SpecialistConfig;

// ---------------------------------------------------------------------------
// SpecialistError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SpecialistError {
    /// HTTP transport or connection error.
    #[error("specialist request failed: {0}")]
    Request(String),

    #[error("specialist request timed out")]
    Timeout,

    #[error("specialist network rejected the request with HTTP {0}")]
    Rejected(u16),

    #[error("failed to parse specialist response: {0}")]
    Parse(String),

    #[error("specialist network returned an empty answer")]
    EmptyResponse,
}

impl From<reqwest::Error> for SpecialistError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SpecialistError::Timeout
        } else {
            SpecialistError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecialistRequest {
    pub request: String,
    /// The call id; comes back with the result.
    pub correlation_token: String,
    /// Identifies the conversation the call belongs to.
    pub conversation_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Answered inline.
    Completed(String),
    /// Accepted; the result arrives later.
    Accepted,
}

/// Must be `Send + Sync` so the session can hold it as
/// `Arc<dyn SpecialistNetwork>` and dispatch from spawned tasks.
#[async_trait]
pub trait SpecialistNetwork: Send + Sync {
    async fn dispatch(&self, request: SpecialistRequest)
        -> Result<DispatchOutcome, SpecialistError>;
}

// ---------------------------------------------------------------------------
// HttpSpecialist
// ---------------------------------------------------------------------------

pub struct HttpSpecialist {
    client: reqwest::Client,
    config: SpecialistConfig,
}

impl HttpSpecialist {
    pub fn from_config(config: &SpecialistConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/requests", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SpecialistNetwork for HttpSpecialist {
    /// The bearer header is attached only for a non-empty `api_key`.
    async fn dispatch(
        &self,
        request: SpecialistRequest,
    ) -> Result<DispatchOutcome, SpecialistError> {
        let mut req = self.client.post(self.url()).json(&request);

        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status().as_u16();
        if status == 202 {
            return Ok(DispatchOutcome::Accepted);
        }
        if !response.status().is_success() {
            return Err(SpecialistError::Rejected(status));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SpecialistError::Parse(e.to_string()))?;
        interpret_body(&body)
    }
}

/// A `2xx` body either carries the answer or says the work was accepted.
fn interpret_body(body: &Value) -> Result<DispatchOutcome, SpecialistError> {
    if body.get("status").and_then(Value::as_str) == Some("accepted") {
        return Ok(DispatchOutcome::Accepted);
    }
    let content = ["content", "result", "answer"]
        .iter()
        .find_map(|k| body.get(*k))
        .ok_or_else(|| SpecialistError::Parse("no content field".into()))?;

    let text = match content {
        Value::String(s) => s.trim().to_owned(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if text.is_empty() {
        return Err(SpecialistError::EmptyResponse);
    }
    Ok(DispatchOutcome::Completed(text))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
