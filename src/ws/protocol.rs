//! WebSocket message type definitions
//!
//! Text frames carry JSON with a "type" field. Binary frames carry audio
//! with a 1-byte prefix: 0x01 = mic audio (phone→server), 0x02 = TTS audio
//! (server→phone).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Binary frame prefix: microphone PCM, phone → server
pub const MIC_PREFIX: u8 = 0x01;

/// Binary frame prefix: TTS MP3, server → phone
pub const TTS_PREFIX: u8 = 0x02;

// ── Phone → Server messages ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SelectWorkspace {
        name: String,
    },
    AudioStart {
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
        #[serde(default = "default_channels")]
        channels: u16,
        #[serde(default = "default_encoding")]
        encoding: String,
    },
    AudioEnd {},
    TextMessage {
        text: String,
    },
    ImageMessage {
        /// base64-encoded image payload
        data: String,
        #[serde(default = "default_media_type")]
        media_type: String,
        #[serde(default)]
        text: Option<String>,
    },
    Interrupt {},
    Ping {},
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_encoding() -> String {
    "pcm_s16le".to_string()
}

fn default_media_type() -> String {
    "image/jpeg".to_string()
}

impl ClientMessage {
    /// Variant label for logging (message bodies can carry large payloads).
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::SelectWorkspace { .. } => "select_workspace",
            ClientMessage::AudioStart { .. } => "audio_start",
            ClientMessage::AudioEnd {} => "audio_end",
            ClientMessage::TextMessage { .. } => "text_message",
            ClientMessage::ImageMessage { .. } => "image_message",
            ClientMessage::Interrupt {} => "interrupt",
            ClientMessage::Ping {} => "ping",
        }
    }
}

/// Parse an inbound JSON text frame.
pub fn parse_incoming(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}

// ── Server → Phone messages ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    WorkspaceList {
        workspaces: Vec<WorkspaceEntry>,
    },
    WorkspaceSelected {
        name: String,
        path: String,
    },
    Transcription {
        text: String,
        is_final: bool,
    },
    ResponseDelta {
        text: String,
    },
    ResponseEnd {},
    ToolUse {
        tool_name: String,
        tool_id: String,
        input: Value,
    },
    ToolResult {
        tool_id: String,
        tool_name: String,
        success: bool,
        output: String,
    },
    TtsStart {
        format: String,
    },
    TtsEnd {},
    Error {
        message: String,
        code: String,
    },
    Pong {},
}

impl ServerMessage {
    pub fn transcription(text: impl Into<String>) -> Self {
        ServerMessage::Transcription {
            text: text.into(),
            is_final: true,
        }
    }

    pub fn tts_start() -> Self {
        ServerMessage::TtsStart {
            format: "mp3".to_string(),
        }
    }

    pub fn error(message: impl Into<String>, code: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub name: String,
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ping_and_interrupt() {
        assert!(matches!(
            parse_incoming(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping {}
        ));
        assert!(matches!(
            parse_incoming(r#"{"type":"interrupt"}"#).unwrap(),
            ClientMessage::Interrupt {}
        ));
    }

    #[test]
    fn test_parse_audio_start_defaults() {
        let msg = parse_incoming(r#"{"type":"audio_start"}"#).unwrap();
        match msg {
            ClientMessage::AudioStart {
                sample_rate,
                channels,
                encoding,
            } => {
                assert_eq!(sample_rate, 16000);
                assert_eq!(channels, 1);
                assert_eq!(encoding, "pcm_s16le");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_image_message_defaults() {
        let msg = parse_incoming(r#"{"type":"image_message","data":"aGk="}"#).unwrap();
        match msg {
            ClientMessage::ImageMessage {
                data,
                media_type,
                text,
            } => {
                assert_eq!(data, "aGk=");
                assert_eq!(media_type, "image/jpeg");
                assert!(text.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_and_missing_type() {
        assert!(parse_incoming(r#"{"type":"warp_drive"}"#).is_err());
        assert!(parse_incoming(r#"{"text":"no type"}"#).is_err());
        assert!(parse_incoming("not json").is_err());
        // Missing required field
        assert!(parse_incoming(r#"{"type":"text_message"}"#).is_err());
    }

    #[test]
    fn test_server_message_tags() {
        let json = serde_json::to_value(ServerMessage::Pong {}).unwrap();
        assert_eq!(json, json!({"type": "pong"}));

        let json = serde_json::to_value(ServerMessage::tts_start()).unwrap();
        assert_eq!(json, json!({"type": "tts_start", "format": "mp3"}));

        let json = serde_json::to_value(ServerMessage::transcription("hi")).unwrap();
        assert_eq!(
            json,
            json!({"type": "transcription", "text": "hi", "is_final": true})
        );

        let json = serde_json::to_value(ServerMessage::error("boom", "claude_error")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "claude_error");
    }

    #[test]
    fn test_outbound_round_trip() {
        let messages = vec![
            ServerMessage::WorkspaceList {
                workspaces: vec![WorkspaceEntry {
                    name: "demo".to_string(),
                    path: "/tmp/demo".to_string(),
                }],
            },
            ServerMessage::WorkspaceSelected {
                name: "demo".to_string(),
                path: "/tmp/demo".to_string(),
            },
            ServerMessage::ResponseDelta {
                text: "hello".to_string(),
            },
            ServerMessage::ResponseEnd {},
            ServerMessage::ToolUse {
                tool_name: "bash".to_string(),
                tool_id: "tu_1".to_string(),
                input: json!({"command": "ls"}),
            },
            ServerMessage::ToolResult {
                tool_id: "tu_1".to_string(),
                tool_name: "bash".to_string(),
                success: true,
                output: "a\nb/".to_string(),
            },
            ServerMessage::TtsEnd {},
        ];

        for message in messages {
            let encoded = serde_json::to_string(&message).unwrap();
            let decoded: ServerMessage = serde_json::from_str(&encoded).unwrap();
            let reencoded = serde_json::to_string(&decoded).unwrap();
            assert_eq!(encoded, reencoded);
        }
    }

    #[test]
    fn test_binary_prefixes() {
        assert_eq!(MIC_PREFIX, 0x01);
        assert_eq!(TTS_PREFIX, 0x02);
    }
}
