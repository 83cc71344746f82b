//! # realtime-transports
//!
//! Pluggable client transports for real-time AI sessions.
//!
//! This crate provides a unified [`Transport`] contract and two backend
//! adapters behind it: a WebRTC peer connection negotiated over HTTP
//! signaling, and a duplex websocket speaking a live AI-model event
//! protocol. The surrounding application stays backend-agnostic by only
//! talking to the trait and receiving inbound events through
//! [`TransportEvents`].
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!                  │       Transport trait        │
//!                  │ connect / disconnect / send  │
//!                  │ enable_mic / enable_camera   │
//!                  └──────────────┬───────────────┘
//!                                 │
//!               ┌─────────────────┴─────────────────┐
//!               │                                   │
//!      ┌────────▼─────────┐               ┌─────────▼────────┐
//!      │ WebRtcTransport  │               │  LiveTransport   │
//!      │ SDP over HTTP +  │               │ duplex websocket │
//!      │ data channel     │               │ + audio pipeline │
//!      └──────────────────┘               └──────────────────┘
//! ```
//!
//! ## Features
//!
//! - **WebRTC adapter** (`webrtc` feature): sans-IO peer connection,
//!   single-flight cancellable negotiation, connection-correlation id for
//!   ICE restarts, reliable-ordered JSON control channel.
//! - **Live adapter** (`live` feature): single-task actor loop serializing
//!   websocket writes, talking-state tracking, tool calls, barge-in.
//! - **Audio pipelines**: threaded PCM16 capture with mute/reacquire and a
//!   playback queue with atomic interrupt.
//!
//! ## Example
//!
//! ```rust,ignore
//! use realtime_transports::{LiveConfig, LiveTransport, NoOpEvents, Transport};
//! use std::sync::Arc;
//!
//! # async fn run(mic: Arc<dyn realtime_transports::AudioSourceFactory>,
//! #              spk: Arc<dyn realtime_transports::AudioSinkFactory>)
//! #              -> realtime_transports::Result<()> {
//! let config = LiveConfig::new(
//!     url::Url::parse("wss://example.com/live")?,
//!     serde_json::json!({ "model": "models/gemini-2.0-flash-live" }),
//! )
//! .with_api_key(std::env::var("API_KEY").unwrap());
//!
//! let transport = LiveTransport::new(config, Arc::new(NoOpEvents), mic, spk);
//! transport.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod tracks;
pub mod transport;

#[cfg(feature = "live")]
pub mod live;
#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use audio::{
    AudioCapture, AudioFormat, AudioFrame, AudioSink, AudioSinkFactory, AudioSource,
    AudioSourceFactory, CaptureObserver, PlaybackQueue, signal_level,
};
pub use config::{LiveConfig, WebRtcConfig};
pub use error::{Result, TransportError};
pub use tracks::{MediaTrack, TrackId, TrackKind, TrackOrigin, TrackRegistry, TrackSet};
pub use transport::{
    CameraMode, FunctionCall, FunctionResult, NoOpEvents, Transport, TransportEvents,
    TransportMessage, TransportState,
};

#[cfg(feature = "live")]
pub use live::LiveTransport;
#[cfg(feature = "webrtc")]
pub use webrtc::{MediaDeviceFactory, NullDeviceFactory, WebRtcTransport};
