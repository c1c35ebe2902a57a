//! # Streaming Wire Protocol
//!
//! Text frames carry JSON control messages tagged by `type`; binary frames
//! carry raw audio and never pass through this module.
//!
//! ## Client → Server:
//! - `{"type": "config", "config": {"language": "en", "task": "transcribe", ...}}`
//! - `{"type": "start_recording"}`
//! - `{"type": "stop_recording"}`
//!
//! ## Server → Client:
//! `ready`, `config_updated`, `recording_started`, `recording_stopped`,
//! `speech_started`, `processing`, `result`, `final_result`, `error`

use serde::{Deserialize, Deserializer, Serialize};

use super::session::SessionConfig;
use crate::transcription::{Segment, Task};

/// Control messages accepted from the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Config {
        #[serde(default)]
        config: SessionConfigUpdate,
    },
    StartRecording,
    StopRecording,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Partial session configuration. Absent keys leave the current value alone.
///
/// `language` distinguishes "absent" (`None`) from "present but null"
/// (`Some(None)`), since only the latter is a validation error.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionConfigUpdate {
    #[serde(default, deserialize_with = "present")]
    pub language: Option<Option<String>>,
    #[serde(default)]
    pub task: Option<Task>,
    #[serde(default, alias = "brailleTable")]
    pub braille_table: Option<String>,
    #[serde(default, alias = "wordTimestamps")]
    pub word_timestamps: Option<bool>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Events sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Ready {
        model: String,
        device: String,
    },
    ConfigUpdated {
        config: SessionConfig,
    },
    RecordingStarted,
    RecordingStopped,
    SpeechStarted,
    Processing {
        duration: f64,
    },
    Result {
        transcribed_text: String,
        braille: String,
        language: String,
        table_used: String,
        audio_duration: f64,
        segments: Option<Vec<Segment>>,
        success: bool,
    },
    FinalResult {
        transcribed_text: String,
        braille: String,
        language: String,
        table_used: String,
        chunks: usize,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Wire name of the event, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Ready { .. } => "ready",
            ServerEvent::ConfigUpdated { .. } => "config_updated",
            ServerEvent::RecordingStarted => "recording_started",
            ServerEvent::RecordingStopped => "recording_stopped",
            ServerEvent::SpeechStarted => "speech_started",
            ServerEvent::Processing { .. } => "processing",
            ServerEvent::Result { .. } => "result",
            ServerEvent::FinalResult { .. } => "final_result",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"start_recording"}"#).unwrap(),
            ClientMessage::StartRecording
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"stop_recording","extra":1}"#).unwrap(),
            ClientMessage::StopRecording
        );
        assert!(ClientMessage::parse(r#"{"type":"pause"}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn test_config_update_distinguishes_null_from_absent() {
        let ClientMessage::Config { config } =
            ClientMessage::parse(r#"{"type":"config","config":{"task":"translate"}}"#).unwrap()
        else {
            panic!("expected config");
        };
        assert_eq!(config.language, None);
        assert_eq!(config.task, Some(Task::Translate));

        let ClientMessage::Config { config } =
            ClientMessage::parse(r#"{"type":"config","config":{"language":null}}"#).unwrap()
        else {
            panic!("expected config");
        };
        assert_eq!(config.language, Some(None));
    }

    #[test]
    fn test_config_update_accepts_camel_case_keys() {
        let ClientMessage::Config { config } = ClientMessage::parse(
            r#"{"type":"config","config":{"brailleTable":"en-us-g1.ctb","wordTimestamps":false}}"#,
        )
        .unwrap() else {
            panic!("expected config");
        };
        assert_eq!(config.braille_table.as_deref(), Some("en-us-g1.ctb"));
        assert_eq!(config.word_timestamps, Some(false));
    }

    #[test]
    fn test_invalid_task_is_a_parse_error() {
        assert!(ClientMessage::parse(r#"{"type":"config","config":{"task":"summarize"}}"#).is_err());
    }

    #[test]
    fn test_event_wire_shape() {
        let value = serde_json::to_value(ServerEvent::RecordingStopped).unwrap();
        assert_eq!(value, json!({"type": "recording_stopped"}));

        let value = serde_json::to_value(ServerEvent::Processing { duration: 3.0 }).unwrap();
        assert_eq!(value, json!({"type": "processing", "duration": 3.0}));

        let event = ServerEvent::Result {
            transcribed_text: "hi".into(),
            braille: "⠓⠊".into(),
            language: "en".into(),
            table_used: "builtin".into(),
            audio_duration: 1.5,
            segments: None,
            success: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["table_used"], "builtin");
        assert!(value["segments"].is_null());
        assert_eq!(event.kind(), "result");
    }
}
