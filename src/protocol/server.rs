//! Events received from the realtime endpoint.
//!
//! Only the fields the session acts on are modelled; everything else in a
//! payload is ignored, and event types the session does not handle decode
//! to [`ServerEvent::Unknown`].

use serde::Deserialize;

use super::ProtocolError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionInfo },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: SessionInfo },

    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseInfo },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        response_id: String,
        item: ItemInfo,
    },

    #[serde(rename = "conversation.item.created")]
    ItemCreated {
        #[serde(default)]
        previous_item_id: Option<String>,
        item: ItemInfo,
    },

    /// One base64 PCM16 fragment of assistant speech.
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        response_id: String,
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.delta")]
    ArgumentsDelta {
        #[serde(default)]
        item_id: Option<String>,
        call_id: String,
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    ArgumentsDone {
        #[serde(default)]
        item_id: Option<String>,
        call_id: String,
        #[serde(default)]
        name: Option<String>,
        arguments: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseInfo },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: u64,
    },

    #[serde(rename = "input_audio_buffer.committed")]
    InputCommitted { item_id: String },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscript { item_id: String, transcript: String },

    #[serde(rename = "conversation.item.truncated")]
    Truncated { item_id: String, audio_end_ms: u64 },

    #[serde(rename = "error")]
    Error { error: ErrorInfo },

    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseInfo {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// A conversation item as echoed back by the endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ItemInfo {
    pub fn is_function_call(&self) -> bool {
        self.kind == "function_call"
    }

    pub fn is_assistant_message(&self) -> bool {
        self.kind == "message" && self.role.as_deref() == Some("assistant")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_delta() {
        let ev = ServerEvent::parse(
            r#"{"type":"response.audio.delta","event_id":"e1","response_id":"r1","item_id":"i1","output_index":0,"content_index":0,"delta":"AAA="}"#,
        )
        .expect("parse");
        assert_eq!(
            ev,
            ServerEvent::AudioDelta {
                response_id: "r1".into(),
                item_id: "i1".into(),
                delta: "AAA=".into()
            }
        );
    }

    #[test]
    fn function_call_item() {
        let ev = ServerEvent::parse(
            r#"{"type":"conversation.item.created","previous_item_id":"i0","item":{"id":"fc1","type":"function_call","call_id":"c1","name":"ask_specialists","arguments":""}}"#,
        )
        .expect("parse");
        let ServerEvent::ItemCreated { item, previous_item_id } = ev else {
            panic!("wrong variant");
        };
        assert!(item.is_function_call());
        assert_eq!(item.call_id.as_deref(), Some("c1"));
        assert_eq!(previous_item_id.as_deref(), Some("i0"));
    }

    #[test]
    fn assistant_message_item() {
        let ev = ServerEvent::parse(
            r#"{"type":"response.output_item.added","response_id":"r1","output_index":0,"item":{"id":"m1","type":"message","role":"assistant","content":[]}}"#,
        )
        .expect("parse");
        let ServerEvent::OutputItemAdded { item, .. } = ev else {
            panic!("wrong variant");
        };
        assert!(item.is_assistant_message());
    }

    #[test]
    fn arguments_done_without_name() {
        let ev = ServerEvent::parse(
            r#"{"type":"response.function_call_arguments.done","call_id":"c1","arguments":"{}"}"#,
        )
        .expect("parse");
        assert!(matches!(ev, ServerEvent::ArgumentsDone { name: None, .. }));
    }

    #[test]
    fn unhandled_type_is_unknown() {
        let ev = ServerEvent::parse(r#"{"type":"rate_limits.updated","rate_limits":[]}"#)
            .expect("parse");
        assert_eq!(ev, ServerEvent::Unknown);
    }

    #[test]
    fn error_event() {
        let ev = ServerEvent::parse(
            r#"{"type":"error","error":{"type":"invalid_request_error","code":"bad","message":"nope"}}"#,
        )
        .expect("parse");
        let ServerEvent::Error { error } = ev else {
            panic!("wrong variant");
        };
        assert_eq!(error.message, "nope");
        assert_eq!(error.code.as_deref(), Some("bad"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(ServerEvent::parse("{not json").is_err());
        // known type with a missing required field
        assert!(ServerEvent::parse(r#"{"type":"response.done"}"#).is_err());
    }
}
