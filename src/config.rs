//! Configuration types for the transports.

use crate::audio::AudioFormat;
use secrecy::SecretString;
use serde_json::Value;
use url::Url;

/// Configuration for the WebRTC media-server transport.
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// Signaling endpoint receiving the offer/answer POST.
    pub connection_url: Url,
    /// Label of the reliable-ordered control data channel.
    pub data_channel_label: String,
}

impl WebRtcConfig {
    /// Create a config for the given signaling endpoint.
    pub fn new(connection_url: Url) -> Self {
        Self { connection_url, data_channel_label: "control".to_string() }
    }

    /// Override the data channel label.
    pub fn with_data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = label.into();
        self
    }
}

/// Configuration for the duplex websocket (live model) transport.
#[derive(Clone)]
pub struct LiveConfig {
    /// Websocket endpoint.
    pub ws_url: Url,
    /// API key appended to the endpoint query string, if the backend
    /// authenticates that way.
    pub api_key: Option<SecretString>,
    /// Opaque model configuration sent once in the setup message.
    pub setup: Value,
    /// Optional text sent as the first user turn once setup completes.
    pub initial_message: Option<String>,
    /// Format of captured microphone audio.
    pub input_format: AudioFormat,
    /// Format of model audio enqueued for playback.
    pub output_format: AudioFormat,
}

impl LiveConfig {
    /// Create a config for the given websocket endpoint and setup payload.
    pub fn new(ws_url: Url, setup: Value) -> Self {
        Self {
            ws_url,
            api_key: None,
            setup,
            initial_message: None,
            input_format: AudioFormat::pcm16_16khz(),
            output_format: AudioFormat::pcm16_24khz(),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Set the initial user message sent after setup completes.
    pub fn with_initial_message(mut self, text: impl Into<String>) -> Self {
        self.initial_message = Some(text.into());
        self
    }

    /// Set the capture format.
    pub fn with_input_format(mut self, format: AudioFormat) -> Self {
        self.input_format = format;
        self
    }

    /// Set the playback format.
    pub fn with_output_format(mut self, format: AudioFormat) -> Self {
        self.output_format = format;
        self
    }
}

impl std::fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConfig")
            .field("ws_url", &self.ws_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("initial_message", &self.initial_message)
            .field("input_format", &self.input_format)
            .field("output_format", &self.output_format)
            .finish()
    }
}
