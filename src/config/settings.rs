//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]`, so a partial `settings.toml` only
//! overrides the keys it names.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppPaths;

// ---------------------------------------------------------------------------
// EndpointConfig
// ---------------------------------------------------------------------------

/// Where and how to reach the realtime conversational endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// WebSocket URL of the realtime endpoint (without query string).
    pub url: String,
    /// Model identifier appended as `?model=…`.
    pub model: String,
    /// Optional HTTP endpoint that mints ephemeral session tokens.  When
    /// `None`, the API key is read from `api_key_env` instead.
    pub token_url: Option<String>,
    /// Environment variable holding a long-lived API key.
    pub api_key_env: String,
    /// Seconds allowed for the token fetch plus WebSocket handshake.
    pub connect_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".into(),
            model: "gpt-4o-realtime-preview".into(),
            token_url: None,
            api_key_env: "OPENAI_API_KEY".into(),
            connect_timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Server-side voice activity detection parameters sent in `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetectionConfig {
    /// Activation threshold (0.0 – 1.0).
    pub threshold: f32,
    /// Audio kept before detected speech, in milliseconds.
    pub prefix_padding_ms: u32,
    /// Silence that ends a user utterance, in milliseconds.
    pub silence_duration_ms: u32,
    /// Let the remote side start a response automatically after each
    /// utterance.
    pub create_response: bool,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            create_response: true,
        }
    }
}

/// A callable operation advertised to the remote model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationSpec {
    pub name: String,
    pub description: String,
    /// Forward to the specialist network (asynchronous result) instead of
    /// acknowledging inline.
    pub forward_to_specialist: bool,
    /// Argument field carrying the request text for the specialist network.
    pub request_field: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

impl Default for OperationSpec {
    fn default() -> Self {
        Self {
            name: "ask_specialists".into(),
            description: "Forward a question or task to the specialist network. \
                          The answer arrives later; keep talking with the user meanwhile."
                .into(),
            forward_to_specialist: true,
            request_field: "request".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "request": {
                        "type": "string",
                        "description": "The full request for the specialists, in plain language."
                    }
                },
                "required": ["request"]
            }),
        }
    }
}

/// Conversation-level settings pushed to the remote side on every connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// System instructions for the assistant.
    pub instructions: String,
    /// Output voice name.
    pub voice: String,
    /// Model used to transcribe the human's audio.  Empty disables input
    /// transcription.
    pub transcription_model: String,
    /// Advertise `operations` as callable tools.
    pub tools_enabled: bool,
    pub turn_detection: TurnDetectionConfig,
    pub operations: Vec<OperationSpec>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instructions: "You are a friendly voice assistant. Keep answers short and \
                           conversational. When a question needs outside expertise, call \
                           ask_specialists and keep the conversation going until the \
                           answer arrives."
                .into(),
            voice: "alloy".into(),
            transcription_model: "whisper-1".into(),
            tools_enabled: true,
            turn_detection: TurnDetectionConfig::default(),
            operations: vec![OperationSpec::default()],
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for capture framing and playback scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Wire sample rate in Hz, both directions (PCM16 mono).
    pub sample_rate: u32,
    /// Samples per outbound capture frame.
    pub frame_samples: usize,
    /// Inbound fragments buffered before the first one of a turn plays.
    pub warmup_fragments: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            frame_samples: 2048,
            warmup_fragments: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// BargeInConfig
// ---------------------------------------------------------------------------

/// Client-side interruption detection while the assistant is speaking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    pub enabled: bool,
    /// RMS level of recent microphone input that counts as an interruption.
    pub threshold: f32,
    /// Milliseconds after the assistant starts speaking before checks begin.
    pub grace_ms: u64,
    /// Milliseconds between checks.
    pub check_interval_ms: u64,
    /// Number of most recent input samples inspected per check.
    pub window_samples: usize,
    /// Milliseconds added to the elapsed playback time when truncating the
    /// assistant's item.
    pub truncate_offset_ms: u64,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.06,
            grace_ms: 500,
            check_interval_ms: 100,
            window_samples: 2048,
            truncate_offset_ms: 150,
        }
    }
}

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Growth of the delay between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every attempt.
    Fixed,
    /// Delay doubles per attempt, capped by `max_delay_ms`.
    Exponential,
}

impl Default for BackoffKind {
    fn default() -> Self {
        Self::Fixed
    }
}

/// Recovery from unexpected socket closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before the session gives up.
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff: BackoffKind,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2000,
            backoff: BackoffKind::default(),
            max_delay_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// InjectionConfig
// ---------------------------------------------------------------------------

/// Delivery of asynchronous operation results into the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Quiet period (both parties silent) required before delivering.
    pub grace_ms: u64,
    /// Outstanding operations older than this are resolved as timed out.
    pub timeout_secs: u64,
    /// Upper bound between timeout sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            grace_ms: 1500,
            timeout_secs: 300,
            sweep_interval_secs: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// SpecialistConfig
// ---------------------------------------------------------------------------

/// HTTP access to the specialist network that serves forwarded requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialistConfig {
    /// Base URL; requests are POSTed to `{base_url}/v1/requests`.
    pub base_url: String,
    /// Bearer token, `None` for unauthenticated local deployments.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SpecialistConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// FillerConfig
// ---------------------------------------------------------------------------

/// Which annotation strategy narrates pending work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillerKind {
    /// Never annotate.
    Off,
    /// One short line per dispatched operation.
    DispatchOnly,
    /// Bounded, prioritised queue of network activity events.
    Priority,
}

impl Default for FillerKind {
    fn default() -> Self {
        Self::DispatchOnly
    }
}

/// Spoken progress updates while specialist requests are outstanding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FillerConfig {
    pub strategy: FillerKind,
    /// Minimum seconds between two spoken annotations.
    pub min_spacing_secs: u64,
    /// Candidates older than this are discarded unspoken.
    pub max_age_secs: u64,
    /// Capacity of the priority strategy's queue.
    pub capacity: usize,
    /// Ask the remote side to speak annotations; when `false` they are only
    /// logged.
    pub speak: bool,
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            strategy: FillerKind::default(),
            min_spacing_secs: 8,
            max_age_secs: 20,
            capacity: 16,
            speak: true,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_bridge::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub endpoint: EndpointConfig,
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub barge_in: BargeInConfig,
    pub reconnect: ReconnectConfig,
    pub injection: InjectionConfig,
    pub specialist: SpecialistConfig,
    pub filler: FillerConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.endpoint.url, loaded.endpoint.url);
        assert_eq!(original.endpoint.model, loaded.endpoint.model);
        assert_eq!(original.endpoint.token_url, loaded.endpoint.token_url);

        assert_eq!(original.session.voice, loaded.session.voice);
        assert_eq!(original.session.turn_detection, loaded.session.turn_detection);
        assert_eq!(original.session.operations, loaded.session.operations);

        assert_eq!(original.audio.sample_rate, loaded.audio.sample_rate);
        assert_eq!(original.audio.warmup_fragments, loaded.audio.warmup_fragments);
        assert_eq!(original.barge_in.threshold, loaded.barge_in.threshold);
        assert_eq!(original.reconnect.backoff, loaded.reconnect.backoff);
        assert_eq!(original.injection.grace_ms, loaded.injection.grace_ms);
        assert_eq!(original.filler.strategy, loaded.filler.strategy);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        let default = AppConfig::default();

        assert_eq!(config.endpoint.url, default.endpoint.url);
        assert_eq!(config.audio.sample_rate, default.audio.sample_rate);
        assert_eq!(config.reconnect.max_attempts, default.reconnect.max_attempts);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.audio.sample_rate, 24_000);
        assert_eq!(cfg.audio.warmup_fragments, 3);
        assert_eq!(cfg.barge_in.grace_ms, 500);
        assert_eq!(cfg.barge_in.check_interval_ms, 100);
        assert_eq!(cfg.barge_in.window_samples, 2048);
        assert_eq!(cfg.barge_in.truncate_offset_ms, 150);
        assert_eq!(cfg.reconnect.max_attempts, 3);
        assert_eq!(cfg.reconnect.delay_ms, 2000);
        assert_eq!(cfg.reconnect.backoff, BackoffKind::Fixed);
        assert_eq!(cfg.injection.grace_ms, 1500);
        assert_eq!(cfg.injection.timeout_secs, 300);
        assert_eq!(cfg.session.operations.len(), 1);
        assert_eq!(cfg.session.operations[0].name, "ask_specialists");
        assert!(cfg.session.operations[0].forward_to_specialist);
    }

    /// A file naming only a couple of keys keeps defaults for the rest.
    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "[reconnect]\nmax_attempts = 5\nbackoff = \"exponential\"\n\n[filler]\nstrategy = \"priority\"\n",
        )
        .expect("write");

        let cfg = AppConfig::load_from(&path).expect("load");
        assert_eq!(cfg.reconnect.max_attempts, 5);
        assert_eq!(cfg.reconnect.backoff, BackoffKind::Exponential);
        assert_eq!(cfg.reconnect.delay_ms, 2000);
        assert_eq!(cfg.filler.strategy, FillerKind::Priority);
        assert_eq!(cfg.audio.frame_samples, 2048);
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.endpoint.token_url = Some("https://example.com/session".into());
        cfg.session.transcription_model = String::new();
        cfg.session.operations.push(OperationSpec {
            name: "set_reminder".into(),
            description: "Store a reminder".into(),
            forward_to_specialist: false,
            request_field: "text".into(),
            parameters: json!({ "type": "object", "properties": {} }),
        });
        cfg.specialist.api_key = Some("sk-test".into());
        cfg.filler.speak = false;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(
            loaded.endpoint.token_url.as_deref(),
            Some("https://example.com/session")
        );
        assert!(loaded.session.transcription_model.is_empty());
        assert_eq!(loaded.session.operations.len(), 2);
        assert_eq!(loaded.session.operations[1].name, "set_reminder");
        assert!(!loaded.session.operations[1].forward_to_specialist);
        assert_eq!(loaded.specialist.api_key.as_deref(), Some("sk-test"));
        assert!(!loaded.filler.speak);
    }
}
