//! Microphone capture loop.
//!
//! A background thread reads fixed-size PCM chunks from an [`AudioSource`]
//! and delivers them, with a per-chunk normalized RMS level, to a single
//! [`CaptureObserver`]. Mute releases the capture device and parks the
//! thread on a condition variable; unmute reacquires the device through the
//! factory and resumes.

use crate::audio::{AudioFormat, signal_level};
use crate::error::{Result, TransportError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A blocking PCM16 capture device.
pub trait AudioSource: Send {
    /// Blocking read into `buf`. Returns the number of bytes read; `Ok(0)`
    /// or `Err` is fatal to the capture loop.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Opens capture devices. Called once at startup and again after every
/// unmute, since mute releases the device.
pub trait AudioSourceFactory: Send + Sync {
    /// Open the capture device for the given format.
    fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioSource>>;
}

/// Receives captured chunks and lifecycle notifications.
///
/// All methods are invoked from the capture thread.
pub trait CaptureObserver: Send {
    /// A chunk was captured. `data` holds the bytes actually read (possibly
    /// fewer than a full chunk); `level` is the normalized RMS in `[0, 1]`.
    fn on_chunk(&mut self, data: &[u8], level: f32);

    /// A fatal device error terminated the loop.
    fn on_error(&mut self, _error: TransportError) {}

    /// The loop exited, via any path. Fires exactly once.
    fn on_stopped(&mut self) {}
}

#[derive(Default)]
struct CaptureState {
    muted: bool,
    stopping: bool,
}

struct Shared {
    state: Mutex<CaptureState>,
    cond: Condvar,
}

/// Handle to a running capture loop.
pub struct AudioCapture {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl AudioCapture {
    /// Open the device and start the capture thread.
    pub fn start(
        factory: Arc<dyn AudioSourceFactory>,
        format: AudioFormat,
        observer: Box<dyn CaptureObserver>,
    ) -> Result<Self> {
        // Fail construction up front if the device cannot be opened at all.
        let source = factory.open(format)?;

        let shared = Arc::new(Shared {
            state: Mutex::new(CaptureState::default()),
            cond: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || run_capture_loop(thread_shared, factory, format, source, observer))
            .map_err(|e| TransportError::init(format!("failed to spawn capture thread: {e}")))?;

        Ok(Self { shared, thread: Some(thread) })
    }

    /// Toggle the mute flag. Muting releases the capture device; unmuting
    /// reacquires it.
    pub fn set_muted(&self, muted: bool) {
        let mut state = self.shared.state.lock();
        if state.muted != muted {
            state.muted = muted;
            self.shared.cond.notify_all();
        }
    }

    /// Whether the loop is currently muted.
    pub fn is_muted(&self) -> bool {
        self.shared.state.lock().muted
    }

    /// Request the loop to stop and join the thread.
    ///
    /// The stop flag is checked at the loop head and at the top of the mute
    /// wait, so the thread exits promptly.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stopping = true;
            self.shared.cond.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AudioCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("AudioCapture")
            .field("muted", &state.muted)
            .field("stopping", &state.stopping)
            .finish()
    }
}

fn run_capture_loop(
    shared: Arc<Shared>,
    factory: Arc<dyn AudioSourceFactory>,
    format: AudioFormat,
    source: Box<dyn AudioSource>,
    mut observer: Box<dyn CaptureObserver>,
) {
    let chunk_size = format.chunk_size_bytes();
    let mut buf = vec![0u8; chunk_size];
    let mut device: Option<Box<dyn AudioSource>> = Some(source);

    loop {
        // Stop flag is checked at the loop head.
        {
            let mut state = shared.state.lock();
            if state.stopping {
                break;
            }
            if state.muted {
                // Entering mute releases the capture device.
                if device.take().is_some() {
                    tracing::debug!("capture muted, releasing device");
                }
                while state.muted && !state.stopping {
                    shared.cond.wait(&mut state);
                }
                if state.stopping {
                    break;
                }
                drop(state);
                // Unmuted: reacquire the device.
                match factory.open(format) {
                    Ok(reopened) => {
                        tracing::debug!("capture unmuted, device reacquired");
                        device = Some(reopened);
                    }
                    Err(e) => {
                        observer.on_error(e);
                        break;
                    }
                }
            }
        }

        let Some(dev) = device.as_mut() else { continue };
        match dev.read(&mut buf) {
            Ok(0) => {
                observer.on_error(TransportError::device("capture read returned 0 bytes"));
                break;
            }
            Ok(n) => {
                let level = signal_level(&buf[..n]);
                observer.on_chunk(&buf[..n], level);
            }
            Err(e) => {
                observer.on_error(TransportError::device(format!("capture read failed: {e}")));
                break;
            }
        }
    }

    observer.on_stopped();
}
