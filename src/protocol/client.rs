//! Messages sent from the client to the realtime endpoint.

use serde::Serialize;
use serde_json::Value;

use crate::config::{AudioConfig, SessionConfig};

/// Every client → server event the session emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },

    /// One base64 PCM16 capture frame.
    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio { audio: String },

    #[serde(rename = "conversation.item.create")]
    CreateItem {
        /// Anchor: the new item is inserted right after this one.
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item: ConversationItem,
    },

    /// Cut an assistant audio item at the point the human stopped hearing it.
    #[serde(rename = "conversation.item.truncate")]
    Truncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },

    #[serde(rename = "response.cancel")]
    CancelResponse,

    #[serde(rename = "response.create")]
    CreateResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseOptions>,
    },
}

impl ClientMessage {
    /// Result of a function call, anchored after the call item.
    pub fn function_output(call_id: &str, anchor: Option<&str>, output: &str) -> Self {
        Self::CreateItem {
            previous_item_id: anchor.map(str::to_owned),
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.to_owned(),
                output: output.to_owned(),
            },
        }
    }

    /// Plain `response.create`.
    pub fn create_response() -> Self {
        Self::CreateResponse { response: None }
    }

    /// `response.create` carrying instructions for this response only.
    pub fn create_response_with(instructions: impl Into<String>) -> Self {
        Self::CreateResponse {
            response: Some(ResponseOptions {
                instructions: Some(instructions.into()),
            }),
        }
    }

    /// Wire name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::AppendAudio { .. } => "input_audio_buffer.append",
            Self::CreateItem { .. } => "conversation.item.create",
            Self::Truncate { .. } => "conversation.item.truncate",
            Self::CancelResponse => "response.cancel",
            Self::CreateResponse { .. } => "response.create",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ConversationItem {
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// session.update payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUpdate {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionSettings>,
    pub turn_detection: TurnDetection,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub create_response: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl SessionUpdate {
    /// Payload sent right after every (re)connect.
    pub fn from_config(session: &SessionConfig, audio: &AudioConfig) -> Self {
        let tools: Vec<ToolDefinition> = if session.tools_enabled {
            session
                .operations
                .iter()
                .map(|op| ToolDefinition {
                    kind: "function".into(),
                    name: op.name.clone(),
                    description: op.description.clone(),
                    parameters: op.parameters.clone(),
                })
                .collect()
        } else {
            Vec::new()
        };
        // pcm16 on this endpoint always means 24 kHz mono.
        if audio.sample_rate != 24_000 {
            log::warn!(
                "session: endpoint expects 24000 Hz pcm16, configured {} Hz",
                audio.sample_rate
            );
        }
        let format = "pcm16".to_owned();

        Self {
            modalities: vec!["audio".into(), "text".into()],
            instructions: session.instructions.clone(),
            voice: session.voice.clone(),
            input_audio_format: format.clone(),
            output_audio_format: format,
            input_audio_transcription: Some(session.transcription_model.trim())
                .filter(|model| !model.is_empty())
                .map(|model| TranscriptionSettings {
                    model: model.to_owned(),
                }),
            turn_detection: TurnDetection {
                kind: "server_vad".into(),
                threshold: session.turn_detection.threshold,
                prefix_padding_ms: session.turn_detection.prefix_padding_ms,
                silence_duration_ms: session.turn_detection.silence_duration_ms,
                create_response: session.turn_detection.create_response,
            },
            tool_choice: (!tools.is_empty()).then(|| "auto".to_owned()),
            tools,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_json(msg: &ClientMessage) -> Value {
        serde_json::to_value(msg).expect("serialise")
    }

    #[test]
    fn function_output_is_anchored() {
        let msg = ClientMessage::function_output("call_1", Some("item_9"), "{\"ok\":true}");
        assert_eq!(
            to_json(&msg),
            json!({
                "type": "conversation.item.create",
                "previous_item_id": "item_9",
                "item": {
                    "type": "function_call_output",
                    "call_id": "call_1",
                    "output": "{\"ok\":true}"
                }
            })
        );
    }

    #[test]
    fn unanchored_output_omits_previous_item() {
        let v = to_json(&ClientMessage::function_output("c", None, "x"));
        assert!(v.get("previous_item_id").is_none());
    }

    #[test]
    fn unit_and_optional_messages() {
        assert_eq!(
            to_json(&ClientMessage::CancelResponse),
            json!({ "type": "response.cancel" })
        );
        assert_eq!(
            to_json(&ClientMessage::create_response()),
            json!({ "type": "response.create" })
        );
        assert_eq!(
            to_json(&ClientMessage::create_response_with("say hi")),
            json!({ "type": "response.create", "response": { "instructions": "say hi" } })
        );
    }

    #[test]
    fn truncate_shape() {
        let msg = ClientMessage::Truncate {
            item_id: "item_3".into(),
            content_index: 0,
            audio_end_ms: 1250,
        };
        assert_eq!(
            to_json(&msg),
            json!({
                "type": "conversation.item.truncate",
                "item_id": "item_3",
                "content_index": 0,
                "audio_end_ms": 1250
            })
        );
        assert_eq!(msg.kind(), "conversation.item.truncate");
    }

    #[test]
    fn session_update_advertises_operations() {
        let cfg = crate::config::AppConfig::default();
        let update = SessionUpdate::from_config(&cfg.session, &cfg.audio);
        let v = to_json(&ClientMessage::SessionUpdate { session: update });

        assert_eq!(v["type"], "session.update");
        assert_eq!(v["session"]["input_audio_format"], "pcm16");
        assert_eq!(v["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(v["session"]["tools"][0]["name"], "ask_specialists");
        assert_eq!(v["session"]["tools"][0]["type"], "function");
        assert_eq!(v["session"]["tool_choice"], "auto");
        assert_eq!(v["session"]["input_audio_transcription"]["model"], "whisper-1");
    }

    #[test]
    fn tools_disabled_omits_tools() {
        let mut cfg = crate::config::AppConfig::default();
        cfg.session.tools_enabled = false;
        cfg.session.transcription_model = String::new();
        let v = serde_json::to_value(SessionUpdate::from_config(&cfg.session, &cfg.audio))
            .expect("serialise");
        assert!(v.get("tools").is_none());
        assert!(v.get("tool_choice").is_none());
        assert!(v.get("input_audio_transcription").is_none());
    }
}
