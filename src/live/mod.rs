//! Duplex websocket transport for live AI-model sessions.
//!
//! Audio-only: microphone capture streams to the model as base64 PCM
//! chunks, model audio plays back locally, and tool calls surface through
//! the event callbacks. Camera control returns `Unsupported`.

mod session;
pub mod wire;

use crate::audio::{AudioSinkFactory, AudioSourceFactory};
use crate::config::LiveConfig;
use crate::error::{Result, TransportError};
use crate::tracks::TrackSet;
use crate::transport::{
    CameraMode, FunctionResult, Transport, TransportEvents, TransportMessage, TransportState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use session::LiveSession;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transport adapter over a duplex model websocket.
pub struct LiveTransport {
    config: LiveConfig,
    events: Arc<dyn TransportEvents>,
    mic_factory: Arc<dyn AudioSourceFactory>,
    sink_factory: Arc<dyn AudioSinkFactory>,
    state: Arc<Mutex<TransportState>>,
    session: tokio::sync::Mutex<Option<Arc<LiveSession>>>,
    // Capture starts unmuted, so a fresh session begins with the mic on.
    mic_enabled: AtomicBool,
}

impl LiveTransport {
    /// Create a transport. Devices are opened on `connect`, not here.
    pub fn new(
        config: LiveConfig,
        events: Arc<dyn TransportEvents>,
        mic_factory: Arc<dyn AudioSourceFactory>,
        sink_factory: Arc<dyn AudioSinkFactory>,
    ) -> Self {
        Self {
            config,
            events,
            mic_factory,
            sink_factory,
            state: Arc::new(Mutex::new(TransportState::Disconnected)),
            session: tokio::sync::Mutex::new(None),
            mic_enabled: AtomicBool::new(true),
        }
    }

    async fn set_state(&self, state: TransportState) {
        let changed = {
            let mut current = self.state.lock();
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        };
        if changed {
            tracing::debug!(%state, "transport state changed");
            self.events.on_state_changed(state).await;
        }
    }

    async fn session(&self) -> Result<Arc<LiveSession>> {
        self.session.lock().await.clone().ok_or(TransportError::NotInitialized)
    }
}

impl std::fmt::Debug for LiveTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveTransport")
            .field("state", &*self.state.lock())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl Transport for LiveTransport {
    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn tracks(&self) -> TrackSet {
        // No negotiated media tracks on the websocket path.
        TrackSet::default()
    }

    async fn connect(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(TransportError::AlreadyInProgress);
        }

        self.set_state(TransportState::Connecting).await;

        let sink = match self.sink_factory.open(self.config.output_format) {
            Ok(sink) => sink,
            Err(e) => {
                self.set_state(TransportState::Error).await;
                return Err(e);
            }
        };

        let session_events: Arc<dyn TransportEvents> = Arc::new(SessionObserver {
            inner: self.events.clone(),
            state: self.state.clone(),
        });

        match LiveSession::start(
            self.config.clone(),
            session_events,
            self.mic_factory.clone(),
            sink,
        )
        .await
        {
            Ok(session) => {
                *slot = Some(Arc::new(session));
                self.mic_enabled.store(true, Ordering::SeqCst);
                // The session may already have raced ahead to Ready.
                let changed = {
                    let mut current = self.state.lock();
                    if *current == TransportState::Connecting {
                        *current = TransportState::Connected;
                        true
                    } else {
                        false
                    }
                };
                if changed {
                    self.events.on_state_changed(TransportState::Connected).await;
                }
                Ok(())
            }
            Err(e) => {
                self.set_state(TransportState::Error).await;
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.stop().await;
        }
        self.set_state(TransportState::Disconnected).await;
        Ok(())
    }

    async fn send_message(&self, message: TransportMessage) -> Result<()> {
        let session = self.session().await?;
        match message.msg_type.as_str() {
            "send-text" => {
                let text = message
                    .data
                    .get("text")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| TransportError::protocol("send-text requires a text field"))?;
                session.send_text(text.to_string())
            }
            "function-result" => {
                let result: FunctionResult = serde_json::from_value(message.data)?;
                session.send_function_result(result)
            }
            other => Err(TransportError::unsupported(format!(
                "message type {other:?} has no websocket mapping"
            ))),
        }
    }

    async fn enable_mic(&self, enabled: bool) -> Result<()> {
        let session = self.session().await?;
        session.set_mic_muted(!enabled)?;
        // Notify only on actual enablement change.
        if self.mic_enabled.swap(enabled, Ordering::SeqCst) != enabled {
            self.events.on_inputs_updated(enabled, false).await;
        }
        Ok(())
    }

    async fn enable_camera(&self, mode: Option<CameraMode>) -> Result<()> {
        match mode {
            Some(_) => Err(TransportError::unsupported("camera capture on the websocket path")),
            None => Ok(()),
        }
    }

    async fn set_mic_muted(&self, muted: bool) -> Result<()> {
        self.session().await?.set_mic_muted(muted)
    }
}

/// Wraps the caller's handler to keep the transport state in step with the
/// session lifecycle before forwarding each notification.
struct SessionObserver {
    inner: Arc<dyn TransportEvents>,
    state: Arc<Mutex<TransportState>>,
}

impl SessionObserver {
    async fn transition(&self, state: TransportState) {
        let changed = {
            let mut current = self.state.lock();
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        };
        if changed {
            self.inner.on_state_changed(state).await;
        }
    }
}

#[async_trait]
impl TransportEvents for SessionObserver {
    async fn on_connected(&self) {
        self.transition(TransportState::Ready).await;
        self.inner.on_connected().await;
    }

    async fn on_disconnected(&self, reason: Option<&str>) {
        let state =
            if reason.is_some() { TransportState::Error } else { TransportState::Disconnected };
        self.transition(state).await;
        self.inner.on_disconnected(reason).await;
    }

    async fn on_state_changed(&self, state: TransportState) {
        self.inner.on_state_changed(state).await;
    }

    async fn on_bot_started_speaking(&self) {
        self.inner.on_bot_started_speaking().await;
    }

    async fn on_bot_stopped_speaking(&self) {
        self.inner.on_bot_stopped_speaking().await;
    }

    async fn on_user_started_speaking(&self) {
        self.inner.on_user_started_speaking().await;
    }

    async fn on_user_stopped_speaking(&self) {
        self.inner.on_user_stopped_speaking().await;
    }

    async fn on_remote_audio_level(&self, level: f32) {
        self.inner.on_remote_audio_level(level).await;
    }

    async fn on_user_audio_level(&self, level: f32) {
        self.inner.on_user_audio_level(level).await;
    }

    async fn on_error(&self, error: &TransportError) {
        self.inner.on_error(error).await;
    }

    async fn on_bot_ready(&self) {
        self.inner.on_bot_ready().await;
    }

    async fn on_function_call(&self, call: crate::transport::FunctionCall) {
        self.inner.on_function_call(call).await;
    }

    async fn on_transcript(&self, text: &str, is_final: bool) {
        self.inner.on_transcript(text, is_final).await;
    }

    async fn on_message(&self, message: TransportMessage) {
        self.inner.on_message(message).await;
    }
}
