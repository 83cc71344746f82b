//! Local capture device and track bookkeeping for the peer connection.
//!
//! All mutation is serialized by the owning session; enabling a device
//! registers a fresh track, disabling unregisters it, and switching camera
//! modes reuses the held device so the published track identity survives.

use crate::error::Result;
use crate::tracks::{MediaTrack, TrackId, TrackKind, TrackRegistry, TrackSet};
use crate::transport::{CameraMode, TransportEvents};
use parking_lot::Mutex;
use std::sync::Arc;

use super::devices::{CameraDevice, MediaDeviceFactory, MicDevice};

pub(crate) struct LocalMedia {
    factory: Arc<dyn MediaDeviceFactory>,
    registry: Arc<TrackRegistry>,
    tracks: Arc<Mutex<TrackSet>>,
    mic: Option<(TrackId, Box<dyn MicDevice>)>,
    camera: Option<(TrackId, Box<dyn CameraDevice>, CameraMode)>,
    mic_muted: bool,
}

impl LocalMedia {
    pub(crate) fn new(
        factory: Arc<dyn MediaDeviceFactory>,
        registry: Arc<TrackRegistry>,
        tracks: Arc<Mutex<TrackSet>>,
    ) -> Self {
        Self { factory, registry, tracks, mic: None, camera: None, mic_muted: false }
    }

    pub(crate) fn mic_enabled(&self) -> bool {
        self.mic.is_some()
    }

    pub(crate) fn camera_enabled(&self) -> bool {
        self.camera.is_some()
    }

    /// Enable or disable the microphone track. Notifies only on change.
    pub(crate) async fn set_mic_enabled(
        &mut self,
        enabled: bool,
        events: &Arc<dyn TransportEvents>,
    ) -> Result<()> {
        match (enabled, self.mic.take()) {
            (true, None) => {
                let mut device = self.factory.open_mic()?;
                if self.mic_muted {
                    device.set_muted(true);
                }
                let track = MediaTrack::local(TrackKind::Audio);
                let id = track.id.clone();
                self.registry.register(track.clone());
                self.tracks.lock().local.set(TrackKind::Audio, Some(track));
                self.mic = Some((id, device));
            }
            (false, Some((id, mut device))) => {
                device.close();
                self.registry.unregister(&id);
                self.tracks.lock().local.set(TrackKind::Audio, None);
            }
            // Already in the requested state.
            (true, existing @ Some(_)) => {
                self.mic = existing;
                return Ok(());
            }
            (false, None) => return Ok(()),
        }
        self.notify(events).await;
        Ok(())
    }

    /// Enable, switch, or disable the camera track.
    pub(crate) async fn set_camera(
        &mut self,
        mode: Option<CameraMode>,
        events: &Arc<dyn TransportEvents>,
    ) -> Result<()> {
        match (mode, self.camera.take()) {
            (Some(mode), None) => {
                let device = self.factory.open_camera(mode)?;
                let track = MediaTrack::local(TrackKind::Video);
                let id = track.id.clone();
                self.registry.register(track.clone());
                self.tracks.lock().local.set(TrackKind::Video, Some(track));
                self.camera = Some((id, device, mode));
            }
            (Some(mode), Some((id, mut device, current))) => {
                // Mode switch keeps device and track identity.
                if mode != current {
                    device.set_mode(mode)?;
                    tracing::debug!(?mode, "camera mode switched");
                }
                self.camera = Some((id, device, mode));
                return Ok(());
            }
            (None, Some((id, mut device, _))) => {
                device.close();
                self.registry.unregister(&id);
                self.tracks.lock().local.set(TrackKind::Video, None);
            }
            (None, None) => return Ok(()),
        }
        self.notify(events).await;
        Ok(())
    }

    /// Mute or unmute the microphone without releasing device or track.
    /// The flag carries over to a device opened later.
    pub(crate) fn set_mic_muted(&mut self, muted: bool) {
        self.mic_muted = muted;
        if let Some((_, device)) = self.mic.as_mut() {
            device.set_muted(muted);
        }
    }

    /// Release all held devices and their tracks.
    pub(crate) fn close_all(&mut self) {
        if let Some((id, mut device)) = self.mic.take() {
            device.close();
            self.registry.unregister(&id);
        }
        if let Some((id, mut device, _)) = self.camera.take() {
            device.close();
            self.registry.unregister(&id);
        }
        *self.tracks.lock() = TrackSet::default();
    }

    async fn notify(&self, events: &Arc<dyn TransportEvents>) {
        let snapshot = self.tracks.lock().clone();
        events.on_tracks_updated(&snapshot).await;
        events.on_inputs_updated(self.mic_enabled(), self.camera_enabled()).await;
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::webrtc::devices::NullDeviceFactory;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct CountingCamera {
        switches: Arc<AtomicUsize>,
    }

    impl CameraDevice for CountingCamera {
        fn set_mode(&mut self, _mode: CameraMode) -> Result<()> {
            self.switches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NullMic;

    impl MicDevice for NullMic {}

    struct CountingFactory {
        mic_opens: Arc<AtomicUsize>,
        camera_opens: Arc<AtomicUsize>,
        switches: Arc<AtomicUsize>,
    }

    impl MediaDeviceFactory for CountingFactory {
        fn open_mic(&self) -> Result<Box<dyn MicDevice>> {
            self.mic_opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullMic))
        }

        fn open_camera(&self, _mode: CameraMode) -> Result<Box<dyn CameraDevice>> {
            self.camera_opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingCamera { switches: self.switches.clone() }))
        }
    }

    struct RecordingEvents {
        tx: mpsc::UnboundedSender<(TrackSet, bool, bool)>,
    }

    #[async_trait::async_trait]
    impl TransportEvents for RecordingEvents {
        async fn on_tracks_updated(&self, tracks: &TrackSet) {
            let _ = self.tx.send((tracks.clone(), false, false));
        }

        async fn on_inputs_updated(&self, mic: bool, camera: bool) {
            let _ = self.tx.send((TrackSet::default(), mic, camera));
        }
    }

    fn fixture() -> (LocalMedia, Arc<TrackRegistry>, Arc<Mutex<TrackSet>>) {
        let registry = Arc::new(TrackRegistry::new());
        let tracks = Arc::new(Mutex::new(TrackSet::default()));
        let media =
            LocalMedia::new(Arc::new(NullDeviceFactory), registry.clone(), tracks.clone());
        (media, registry, tracks)
    }

    fn no_events() -> Arc<dyn TransportEvents> {
        Arc::new(crate::transport::NoOpEvents)
    }

    #[tokio::test]
    async fn mic_enable_registers_a_track() {
        let (mut media, registry, tracks) = fixture();
        let events = no_events();

        media.set_mic_enabled(true, &events).await.unwrap();
        assert!(media.mic_enabled());
        assert_eq!(registry.len(), 1);
        assert!(tracks.lock().local.audio.is_some());

        media.set_mic_enabled(false, &events).await.unwrap();
        assert!(!media.mic_enabled());
        assert!(registry.is_empty());
        assert!(tracks.lock().local.audio.is_none());
    }

    #[tokio::test]
    async fn duplicate_enable_does_not_notify() {
        let registry = Arc::new(TrackRegistry::new());
        let tracks = Arc::new(Mutex::new(TrackSet::default()));
        let mut media =
            LocalMedia::new(Arc::new(NullDeviceFactory), registry.clone(), tracks.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let events: Arc<dyn TransportEvents> = Arc::new(RecordingEvents { tx });

        media.set_mic_enabled(true, &events).await.unwrap();
        // Two notifications: tracks and inputs.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());

        media.set_mic_enabled(true, &events).await.unwrap();
        assert!(rx.try_recv().is_err(), "duplicate enable must stay silent");
    }

    #[tokio::test]
    async fn camera_mode_switch_keeps_track_identity() {
        let mic_opens = Arc::new(AtomicUsize::new(0));
        let camera_opens = Arc::new(AtomicUsize::new(0));
        let switches = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(TrackRegistry::new());
        let tracks = Arc::new(Mutex::new(TrackSet::default()));
        let mut media = LocalMedia::new(
            Arc::new(CountingFactory {
                mic_opens,
                camera_opens: camera_opens.clone(),
                switches: switches.clone(),
            }),
            registry.clone(),
            tracks.clone(),
        );
        let events = no_events();

        media.set_camera(Some(CameraMode::Front), &events).await.unwrap();
        assert!(media.camera_enabled());
        let first_id = tracks.lock().local.video.as_ref().unwrap().id.clone();

        media.set_camera(Some(CameraMode::Back), &events).await.unwrap();
        let second_id = tracks.lock().local.video.as_ref().unwrap().id.clone();

        assert_eq!(first_id, second_id);
        assert_eq!(camera_opens.load(Ordering::SeqCst), 1, "device reused across switch");
        assert_eq!(switches.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn close_all_releases_everything() {
        let (mut media, registry, tracks) = fixture();
        let events = no_events();

        media.set_mic_enabled(true, &events).await.unwrap();
        media.set_camera(Some(CameraMode::Front), &events).await.unwrap();
        assert_eq!(registry.len(), 2);

        media.close_all();
        assert!(registry.is_empty());
        assert_eq!(*tracks.lock(), TrackSet::default());
    }

    struct FailingFactory;

    impl MediaDeviceFactory for FailingFactory {
        fn open_mic(&self) -> Result<Box<dyn MicDevice>> {
            Err(TransportError::device("no microphone present"))
        }

        fn open_camera(&self, _mode: CameraMode) -> Result<Box<dyn CameraDevice>> {
            Err(TransportError::device("no camera present"))
        }
    }

    struct MuteTrackingMic {
        muted: Arc<AtomicBool>,
    }

    impl MicDevice for MuteTrackingMic {
        fn set_muted(&mut self, muted: bool) {
            self.muted.store(muted, Ordering::SeqCst);
        }
    }

    struct MuteTrackingFactory {
        muted: Arc<AtomicBool>,
    }

    impl MediaDeviceFactory for MuteTrackingFactory {
        fn open_mic(&self) -> Result<Box<dyn MicDevice>> {
            Ok(Box::new(MuteTrackingMic { muted: self.muted.clone() }))
        }

        fn open_camera(&self, _mode: CameraMode) -> Result<Box<dyn CameraDevice>> {
            Ok(Box::new(CountingCamera { switches: Arc::new(AtomicUsize::new(0)) }))
        }
    }

    #[tokio::test]
    async fn mute_reaches_the_held_mic_device() {
        let muted = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(TrackRegistry::new());
        let tracks = Arc::new(Mutex::new(TrackSet::default()));
        let mut media = LocalMedia::new(
            Arc::new(MuteTrackingFactory { muted: muted.clone() }),
            registry,
            tracks,
        );
        let events = no_events();

        media.set_mic_enabled(true, &events).await.unwrap();
        media.set_mic_muted(true);
        assert!(muted.load(Ordering::SeqCst));
        media.set_mic_muted(false);
        assert!(!muted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn mute_flag_carries_over_to_a_later_opened_device() {
        let muted = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(TrackRegistry::new());
        let tracks = Arc::new(Mutex::new(TrackSet::default()));
        let mut media = LocalMedia::new(
            Arc::new(MuteTrackingFactory { muted: muted.clone() }),
            registry,
            tracks,
        );
        let events = no_events();

        media.set_mic_muted(true);
        media.set_mic_enabled(true, &events).await.unwrap();
        assert!(muted.load(Ordering::SeqCst), "mute set before enable must apply on open");
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        MicOn,
        MicOff,
        Camera(Option<CameraMode>),
    }

    fn op_strategy() -> impl proptest::strategy::Strategy<Value = Op> {
        use proptest::prelude::*;
        prop_oneof![
            Just(Op::MicOn),
            Just(Op::MicOff),
            Just(Op::Camera(Some(CameraMode::Front))),
            Just(Op::Camera(Some(CameraMode::Back))),
            Just(Op::Camera(None)),
        ]
    }

    proptest::proptest! {
        // Any sequence of device toggles leaves the snapshot matching the
        // last requested state for each kind, with no stray registrations.
        #[test]
        fn toggle_sequences_converge_on_last_requested_state(
            ops in proptest::collection::vec(op_strategy(), 1..24),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (mut media, registry, tracks) = fixture();
                let events = no_events();

                let mut mic_on = false;
                let mut camera_mode: Option<CameraMode> = None;
                for op in &ops {
                    match op {
                        Op::MicOn => {
                            media.set_mic_enabled(true, &events).await.unwrap();
                            mic_on = true;
                        }
                        Op::MicOff => {
                            media.set_mic_enabled(false, &events).await.unwrap();
                            mic_on = false;
                        }
                        Op::Camera(mode) => {
                            media.set_camera(*mode, &events).await.unwrap();
                            camera_mode = *mode;
                        }
                    }
                }

                let snapshot = tracks.lock().clone();
                assert_eq!(snapshot.local.audio.is_some(), mic_on);
                assert_eq!(snapshot.local.video.is_some(), camera_mode.is_some());
                let expected =
                    usize::from(mic_on) + usize::from(camera_mode.is_some());
                assert_eq!(registry.len(), expected);
            });
        }
    }

    #[tokio::test]
    async fn device_open_failure_leaves_no_track_behind() {
        let registry = Arc::new(TrackRegistry::new());
        let tracks = Arc::new(Mutex::new(TrackSet::default()));
        let mut media =
            LocalMedia::new(Arc::new(FailingFactory), registry.clone(), tracks.clone());
        let events = no_events();

        assert!(media.set_mic_enabled(true, &events).await.is_err());
        assert!(!media.mic_enabled());
        assert!(registry.is_empty());
        assert!(tracks.lock().local.audio.is_none());
    }
}
