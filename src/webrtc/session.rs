//! Peer-connection session: SDP negotiation, local track management, and
//! the control data channel.
//!
//! The sans-IO WebRTC state machine is owned by a background driver task
//! (see [`super::driver`]); the session communicates with it only through
//! channels, so no lock is ever held across network I/O.

use crate::config::WebRtcConfig;
use crate::error::{Result, TransportError};
use crate::tracks::{TrackRegistry, TrackSet};
use crate::transport::{CameraMode, TransportEvents, TransportMessage};
use crate::webrtc::devices::MediaDeviceFactory;
use crate::webrtc::driver::{self, DriverCommand};
use crate::webrtc::media::LocalMedia;
use crate::webrtc::signaling::{OfferRequest, SignalingClient};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use str0m::change::SdpAnswer;
use str0m::media::{Direction, MediaKind};
use str0m::net::Protocol;
use str0m::{Candidate, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// One negotiated peer connection.
///
/// Created by a (cancellable) negotiation task; aborting that task before
/// the SDP answer is applied leaves no connection behind.
pub(crate) struct PeerSession {
    cmd_tx: mpsc::Sender<DriverCommand>,
    close_tx: mpsc::Sender<()>,
    driver: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    pc_id: Option<String>,
    tracks: Arc<Mutex<TrackSet>>,
    // Serializes all local track mutation.
    media: tokio::sync::Mutex<LocalMedia>,
    events: Arc<dyn TransportEvents>,
}

impl PeerSession {
    /// Run the full offer/answer handshake and start the I/O driver.
    ///
    /// Every await in here is a cancellation point; in particular, aborting
    /// during the signaling round trip means the remote description is never
    /// applied.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn establish(
        config: WebRtcConfig,
        events: Arc<dyn TransportEvents>,
        devices: Arc<dyn MediaDeviceFactory>,
        registry: Arc<TrackRegistry>,
        tracks: Arc<Mutex<TrackSet>>,
        prior_pc_id: Option<String>,
        restart: bool,
    ) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TransportError::connection(format!("failed to bind UDP socket: {e}")))?;
        let mut local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::connection(format!("no local UDP address: {e}")))?;
        // An unspecified bind address is not a routable candidate.
        if local_addr.ip().is_unspecified() {
            local_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local_addr.port());
        }

        let mut rtc = Rtc::new(Instant::now());

        let candidate = Candidate::host(local_addr, Protocol::Udp)
            .map_err(|e| TransportError::connection(format!("invalid host candidate: {e}")))?;
        let _ = rtc.add_local_candidate(candidate);

        let mut changes = rtc.sdp_api();
        let audio_mid = changes.add_media(MediaKind::Audio, Direction::SendRecv, None, None, None);
        let video_mid = changes.add_media(MediaKind::Video, Direction::SendRecv, None, None, None);
        let channel_id = changes.add_channel(config.data_channel_label.clone());
        let (offer, pending) = changes
            .apply()
            .ok_or_else(|| TransportError::init("no local changes to offer"))?;

        tracing::debug!(%audio_mid, %video_mid, "created local SDP offer");

        let signaling = SignalingClient::new(config.connection_url.clone());
        let answer = signaling
            .exchange(OfferRequest::new(offer.to_sdp_string(), prior_pc_id, restart))
            .await?;

        let remote = SdpAnswer::from_sdp_string(&answer.sdp)
            .map_err(|e| TransportError::protocol(format!("invalid SDP answer: {e}")))?;
        rtc.sdp_api()
            .accept_answer(pending, remote)
            .map_err(|e| TransportError::protocol(format!("SDP answer rejected: {e}")))?;

        tracing::info!(pc_id = ?answer.pc_id, "SDP handshake complete");

        let (cmd_tx, cmd_rx) = mpsc::channel(100);
        let (close_tx, close_rx) = mpsc::channel(1);
        let driver = tokio::spawn(driver::run(
            rtc,
            socket,
            local_addr,
            channel_id,
            cmd_rx,
            close_rx,
            events.clone(),
            registry.clone(),
            tracks.clone(),
        ));

        Ok(Self {
            cmd_tx,
            close_tx,
            driver: tokio::sync::Mutex::new(Some(driver)),
            pc_id: answer.pc_id,
            tracks: tracks.clone(),
            media: tokio::sync::Mutex::new(LocalMedia::new(devices, registry, tracks)),
            events,
        })
    }

    /// Correlation id returned by the signaling peer, echoed on restarts.
    pub(crate) fn pc_id(&self) -> Option<&str> {
        self.pc_id.as_deref()
    }

    /// JSON-encode a message and hand it to the driver for the control
    /// channel. Queued (bounded) if the channel has not opened yet.
    pub(crate) async fn send_message(&self, message: &TransportMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.cmd_tx
            .send(DriverCommand::SendControl(json))
            .await
            .map_err(|_| TransportError::SessionClosed)
    }

    /// Enable or disable the local microphone track.
    pub(crate) async fn set_mic_enabled(&self, enabled: bool) -> Result<()> {
        self.media.lock().await.set_mic_enabled(enabled, &self.events).await
    }

    /// Enable, switch, or disable the local camera track.
    pub(crate) async fn set_camera(&self, mode: Option<CameraMode>) -> Result<()> {
        self.media.lock().await.set_camera(mode, &self.events).await
    }

    /// Mute the microphone without releasing the device or track.
    pub(crate) async fn set_mic_muted(&self, muted: bool) {
        self.media.lock().await.set_mic_muted(muted);
    }

    /// Tear the session down. Idempotent; safe on a session whose channel
    /// never opened.
    pub(crate) async fn dispose(&self) {
        self.media.lock().await.close_all();
        let _ = self.close_tx.send(()).await;
        if let Some(driver) = self.driver.lock().await.take() {
            if driver.await.is_err() {
                tracing::error!("peer connection driver panicked");
            }
        }
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("pc_id", &self.pc_id)
            .field("tracks", &*self.tracks.lock())
            .finish()
    }
}
