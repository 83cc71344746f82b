//! WebRTC peer-connection transport.
//!
//! Negotiates a peer connection against an HTTP signaling endpoint and
//! exchanges control messages over a reliable-ordered data channel.
//! Negotiation runs as a cancellable task with a single-flight guarantee:
//! a second attempt while one is outstanding fails immediately instead of
//! queuing, and disposal aborts-and-joins the in-flight attempt before any
//! resource it might touch is released.

mod devices;
mod driver;
mod media;
mod session;
pub mod signaling;

pub use devices::{CameraDevice, MediaDeviceFactory, MicDevice, NullDeviceFactory};

use crate::config::WebRtcConfig;
use crate::error::{Result, TransportError};
use crate::tracks::{TrackRegistry, TrackSet};
use crate::transport::{
    CameraMode, Transport, TransportEvents, TransportMessage, TransportState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use session::PeerSession;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transport adapter over a negotiated peer connection.
pub struct WebRtcTransport {
    config: WebRtcConfig,
    events: Arc<dyn TransportEvents>,
    devices: Arc<dyn MediaDeviceFactory>,
    registry: Arc<TrackRegistry>,
    state: Arc<Mutex<TransportState>>,
    tracks: Arc<Mutex<TrackSet>>,
    session: tokio::sync::Mutex<Option<Arc<PeerSession>>>,
    negotiating: AtomicBool,
    negotiation: Mutex<Option<tokio::task::AbortHandle>>,
    // Correlation id from the last successful negotiation, echoed on restart.
    pc_id: Mutex<Option<String>>,
}

impl WebRtcTransport {
    /// Create a transport. Nothing is negotiated until `connect`.
    pub fn new(
        config: WebRtcConfig,
        events: Arc<dyn TransportEvents>,
        devices: Arc<dyn MediaDeviceFactory>,
    ) -> Self {
        Self {
            config,
            events,
            devices,
            registry: Arc::new(TrackRegistry::new()),
            state: Arc::new(Mutex::new(TransportState::Disconnected)),
            tracks: Arc::new(Mutex::new(TrackSet::default())),
            session: tokio::sync::Mutex::new(None),
            negotiating: AtomicBool::new(false),
            negotiation: Mutex::new(None),
            pc_id: Mutex::new(None),
        }
    }

    /// The registry of live tracks on this transport.
    pub fn registry(&self) -> Arc<TrackRegistry> {
        self.registry.clone()
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

    async fn session(&self) -> Result<Arc<PeerSession>> {
        self.session.lock().await.clone().ok_or(TransportError::NotInitialized)
    }

    /// Run one negotiation attempt end to end, enforcing single flight.
    async fn negotiate(&self, restart: bool) -> Result<()> {
        if self.negotiating.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err()
        {
            return Err(TransportError::AlreadyInProgress);
        }

        self.set_state(TransportState::Connecting).await;

        let observer: Arc<dyn TransportEvents> = Arc::new(PeerObserver {
            inner: self.events.clone(),
            state: self.state.clone(),
        });
        let handle = tokio::spawn(PeerSession::establish(
            self.config.clone(),
            observer,
            self.devices.clone(),
            self.registry.clone(),
            self.tracks.clone(),
            self.pc_id.lock().clone(),
            restart,
        ));

        // Park the abort handle so dispose can cancel the attempt mid-flight.
        *self.negotiation.lock() = Some(handle.abort_handle());
        let outcome = handle.await;
        *self.negotiation.lock() = None;
        self.negotiating.store(false, Ordering::SeqCst);

        match outcome {
            Ok(Ok(session)) => {
                *self.pc_id.lock() = session.pc_id().map(str::to_string);
                *self.session.lock().await = Some(Arc::new(session));
                // The driver may already have raced ahead to Ready.
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
            Ok(Err(e)) => {
                self.set_state(TransportState::Error).await;
                Err(e)
            }
            Err(join_error) => {
                if join_error.is_cancelled() {
                    self.set_state(TransportState::Disconnected).await;
                    Err(TransportError::Cancelled)
                } else {
                    self.set_state(TransportState::Error).await;
                    Err(TransportError::init("negotiation task panicked"))
                }
            }
        }
    }

    /// Renegotiate against the signaling peer, asking it to rebuild its end
    /// of the connection. The prior correlation id is echoed so the peer can
    /// associate the restart with the existing logical connection.
    pub async fn restart_connection(&self) -> Result<()> {
        if let Some(session) = self.session.lock().await.take() {
            session.dispose().await;
        }
        self.negotiate(true).await
    }
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("state", &*self.state.lock())
            .field("pc_id", &*self.pc_id.lock())
            .finish()
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn tracks(&self) -> TrackSet {
        self.tracks.lock().clone()
    }

    async fn connect(&self) -> Result<()> {
        if self.session.lock().await.is_some() {
            return Err(TransportError::AlreadyInProgress);
        }
        self.negotiate(false).await
    }

    async fn disconnect(&self) -> Result<()> {
        // Abort any in-flight negotiation before touching its resources. An
        // aborted attempt stops at its next await and never applies the
        // remote description.
        if let Some(handle) = self.negotiation.lock().take() {
            handle.abort();
        }
        if let Some(session) = self.session.lock().await.take() {
            session.dispose().await;
        }
        self.set_state(TransportState::Disconnected).await;
        Ok(())
    }

    async fn send_message(&self, message: TransportMessage) -> Result<()> {
        self.session().await?.send_message(&message).await
    }

    async fn enable_mic(&self, enabled: bool) -> Result<()> {
        self.session().await?.set_mic_enabled(enabled).await
    }

    async fn enable_camera(&self, mode: Option<CameraMode>) -> Result<()> {
        self.session().await?.set_camera(mode).await
    }

    async fn set_mic_muted(&self, muted: bool) -> Result<()> {
        self.session().await?.set_mic_muted(muted).await;
        Ok(())
    }
}

/// Keeps the transport state in step with driver lifecycle notifications
/// before forwarding them to the caller's handler.
struct PeerObserver {
    inner: Arc<dyn TransportEvents>,
    state: Arc<Mutex<TransportState>>,
}

impl PeerObserver {
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
impl TransportEvents for PeerObserver {
    async fn on_connected(&self) {
        // Control channel open end to end.
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

    async fn on_participant_joined(&self, participant_id: &str) {
        self.inner.on_participant_joined(participant_id).await;
    }

    async fn on_tracks_updated(&self, tracks: &TrackSet) {
        self.inner.on_tracks_updated(tracks).await;
    }

    async fn on_inputs_updated(&self, mic_enabled: bool, camera_enabled: bool) {
        self.inner.on_inputs_updated(mic_enabled, camera_enabled).await;
    }

    async fn on_error(&self, error: &TransportError) {
        self.inner.on_error(error).await;
    }

    async fn on_bot_ready(&self) {
        self.inner.on_bot_ready().await;
    }

    async fn on_message(&self, message: TransportMessage) {
        self.inner.on_message(message).await;
    }
}
