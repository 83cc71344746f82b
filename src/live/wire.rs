//! Wire format of the duplex model socket.
//!
//! All frames are JSON text (or binary decoded as UTF-8). Outbound client
//! frames carry exactly one of `setup`, `realtime_input`, `client_content`,
//! or `tool_response`; inbound server frames carry exactly one of
//! `setup_complete`, `server_content`, or `tool_call`.

use crate::audio::AudioFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound client frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientMessage {
    /// One-time model configuration, sent at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<Value>,
    /// Streamed media input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_input: Option<RealtimeInput>,
    /// A complete user turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_content: Option<ClientContent>,
    /// Tool/function results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<ToolResponsePayload>,
}

impl ClientMessage {
    /// The one-time setup frame.
    pub fn setup(config: Value) -> Self {
        Self { setup: Some(config), ..Default::default() }
    }

    /// A media-chunk frame carrying one base64 PCM chunk.
    pub fn media_chunk(format: AudioFormat, base64_data: String) -> Self {
        Self {
            realtime_input: Some(RealtimeInput {
                media_chunks: vec![MediaChunk { mime_type: format.mime_type(), data: base64_data }],
            }),
            ..Default::default()
        }
    }

    /// A complete user text turn.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            client_content: Some(ClientContent {
                turns: vec![Turn {
                    role: "user".to_string(),
                    parts: vec![Part { text: Some(text.into()), inline_data: None }],
                }],
                turn_complete: true,
            }),
            ..Default::default()
        }
    }

    /// A tool response frame.
    pub fn tool_response(responses: Vec<FunctionResponse>) -> Self {
        Self {
            tool_response: Some(ToolResponsePayload { function_responses: responses }),
            ..Default::default()
        }
    }
}

/// Streamed media input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeInput {
    /// Captured media chunks.
    pub media_chunks: Vec<MediaChunk>,
}

/// One base64-encoded media chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaChunk {
    /// Mime type, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

/// A complete client turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientContent {
    /// Conversation turns.
    pub turns: Vec<Turn>,
    /// Whether the turn is complete.
    pub turn_complete: bool,
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker role.
    pub role: String,
    /// Content parts.
    pub parts: Vec<Part>,
}

/// A content part: text or inline binary data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    /// Text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline binary content (base64).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

/// Base64 binary content with its mime type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineData {
    /// Mime type of the payload.
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

/// Tool results payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponsePayload {
    /// One entry per answered call.
    pub function_responses: Vec<FunctionResponse>,
}

/// One tool/function result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Call id being responded to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name.
    pub name: String,
    /// Result payload.
    pub response: Value,
    /// Whether further results will follow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_continue: Option<bool>,
    /// Backend scheduling hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<String>,
}

/// Inbound server frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Acknowledges the setup message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,
    /// Model output and turn lifecycle flags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    /// Tool invocation request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallPayload>,
}

/// Model output for the current turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerContent {
    /// Content parts produced by the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    /// Set when the model finished its turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
    /// Set when the user barged in and queued output must be discarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
}

/// The model's turn content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTurn {
    /// Content parts.
    pub parts: Vec<Part>,
}

/// Tool invocation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPayload {
    /// Requested calls.
    pub function_calls: Vec<FunctionCallEntry>,
}

/// One requested tool/function call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallEntry {
    /// Backend-assigned call id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name.
    pub name: String,
    /// Arguments as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}
