//! The transport lifecycle contract and its callback surface.
//!
//! Every backend adapter implements [`Transport`]; the surrounding client
//! library stays backend-agnostic by only talking to this trait and by
//! receiving inbound events through [`TransportEvents`].

use crate::error::{Result, TransportError};
use crate::tracks::TrackSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection state of a transport, observed by the SDK.
///
/// Monotonic per connection attempt: a successful connect always passes
/// through `Connecting` before `Connected`/`Ready`, and a connect-time
/// failure ends at `Error` or `Disconnected`, never stuck at `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// No session exists.
    #[default]
    Disconnected,
    /// A session is being established.
    Connecting,
    /// The media/control path is negotiated.
    Connected,
    /// The control channel is usable end to end.
    Ready,
    /// The last connection attempt or session failed.
    Error,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Which camera device a video-capable transport should capture from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    /// Front-facing camera.
    Front,
    /// Rear-facing camera.
    Back,
}

/// The normalized message envelope exchanged with the SDK layer.
///
/// Backend-specific wire messages are translated to and from this shape at
/// the transport boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Correlation id, if the message participates in a request/response pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Message type discriminator (e.g. "bot-ready", "send-text").
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Message payload.
    #[serde(default)]
    pub data: Value,
}

impl TransportMessage {
    /// Create a new message with the given type and payload.
    pub fn new(msg_type: impl Into<String>, data: Value) -> Self {
        Self { id: None, msg_type: msg_type.into(), data }
    }

    /// Attach a correlation id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A tool/function invocation forwarded from the model backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Backend-assigned call id, echoed in the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name.
    pub name: String,
    /// Arguments as JSON.
    pub arguments: Value,
}

/// A tool/function result sent back to the model backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    /// The call id being responded to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name.
    pub name: String,
    /// The result payload.
    pub response: Value,
    /// Whether further results for this call will follow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_continue: Option<bool>,
    /// Backend-specific scheduling hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<String>,
}

/// Callback surface consumed by the SDK layer.
///
/// All methods default to no-ops so implementors only override what they
/// observe. Edge-triggered callbacks (speaking indicators, track updates)
/// fire only on actual state change, never repeatedly.
#[async_trait]
pub trait TransportEvents: Send + Sync {
    /// The session is established and usable.
    async fn on_connected(&self) {}

    /// The session ended; `reason` carries the failure description, if any.
    async fn on_disconnected(&self, _reason: Option<&str>) {}

    /// The transport moved to a new state.
    async fn on_state_changed(&self, _state: TransportState) {}

    /// A remote participant joined the session.
    async fn on_participant_joined(&self, _participant_id: &str) {}

    /// The set of live tracks changed.
    async fn on_tracks_updated(&self, _tracks: &TrackSet) {}

    /// Local input enablement changed (mic, camera).
    async fn on_inputs_updated(&self, _mic_enabled: bool, _camera_enabled: bool) {}

    /// The bot started producing audio.
    async fn on_bot_started_speaking(&self) {}

    /// The bot stopped producing audio.
    async fn on_bot_stopped_speaking(&self) {}

    /// The user started speaking.
    async fn on_user_started_speaking(&self) {}

    /// The user stopped speaking.
    async fn on_user_stopped_speaking(&self) {}

    /// Normalized remote (bot) audio level in `[0, 1]`.
    async fn on_remote_audio_level(&self, _level: f32) {}

    /// Normalized local (user) audio level in `[0, 1]`.
    async fn on_user_audio_level(&self, _level: f32) {}

    /// A backend error that did not end the session.
    async fn on_error(&self, _error: &TransportError) {}

    /// The bot signalled readiness on the control channel.
    async fn on_bot_ready(&self) {}

    /// The model requested a tool/function invocation.
    async fn on_function_call(&self, _call: FunctionCall) {}

    /// A transcript fragment for the current turn.
    async fn on_transcript(&self, _text: &str, _is_final: bool) {}

    /// Any other inbound message in the normalized envelope.
    async fn on_message(&self, _message: TransportMessage) {}
}

/// Default no-op event handler.
#[derive(Debug, Clone, Default)]
pub struct NoOpEvents;

#[async_trait]
impl TransportEvents for NoOpEvents {}

/// The fixed external lifecycle contract each backend adapter implements.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Current transport state.
    fn state(&self) -> TransportState;

    /// Current track snapshot.
    fn tracks(&self) -> TrackSet;

    /// Establish the session. On return the transport is `Connected` (or
    /// `Ready`); on error the state is `Error`/`Disconnected`, never stuck
    /// at `Connecting`.
    async fn connect(&self) -> Result<()>;

    /// Tear the session down and release its resources. Safe to call on a
    /// transport that never fully connected.
    async fn disconnect(&self) -> Result<()>;

    /// Send a message in the normalized envelope through the session's
    /// control path.
    async fn send_message(&self, message: TransportMessage) -> Result<()>;

    /// Enable or disable the microphone.
    async fn enable_mic(&self, enabled: bool) -> Result<()>;

    /// Enable the camera in the given mode, or disable it with `None`.
    ///
    /// Audio-only backends return [`TransportError::Unsupported`].
    async fn enable_camera(&self, mode: Option<CameraMode>) -> Result<()>;

    /// Mute or unmute the microphone without tearing the session down.
    async fn set_mic_muted(&self, muted: bool) -> Result<()>;
}
