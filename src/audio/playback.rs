//! Playback queue with barge-in support.
//!
//! Decoded PCM frames are buffered and written to an [`AudioSink`] strictly
//! in arrival order by a dedicated consumer thread. An interrupt discards
//! all queued, not-yet-consumed frames atomically; it never touches a frame
//! the consumer has already dequeued for writing.

use crate::audio::signal_level;
use crate::error::{Result, TransportError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A blocking PCM16 output device.
pub trait AudioSink: Send {
    /// Write as many bytes of `buf` as the device accepts. A non-positive
    /// result is fatal to the playback thread.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize>;
}

/// Opens playback devices, once per session.
pub trait AudioSinkFactory: Send + Sync {
    /// Open the output device for the given format.
    fn open(&self, format: crate::audio::AudioFormat) -> Result<Box<dyn AudioSink>>;
}

/// `None` is the stop sentinel: the consumer terminates after draining
/// whatever precedes it.
struct QueueState {
    items: VecDeque<Option<Vec<u8>>>,
    stopped: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    cond: Condvar,
}

/// Handle to a running playback queue.
pub struct PlaybackQueue {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackQueue {
    /// Start the consumer thread over the given sink. `level_observer`, if
    /// set, receives the normalized RMS level of every frame written.
    pub fn start(
        sink: Box<dyn AudioSink>,
        level_observer: Option<Box<dyn Fn(f32) + Send>>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState { items: VecDeque::new(), stopped: false }),
            cond: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || run_playback_loop(thread_shared, sink, level_observer))
            .map_err(|e| TransportError::init(format!("failed to spawn playback thread: {e}")))?;

        Ok(Self { shared, thread: Some(thread) })
    }

    /// Enqueue a frame for playback. No-op once the queue has been told to
    /// stop.
    pub fn write(&self, frame: Vec<u8>) {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return;
        }
        state.items.push_back(Some(frame));
        self.shared.cond.notify_one();
    }

    /// Enqueue the stop sentinel; the consumer terminates after draining
    /// what precedes it. Idempotent.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        state.items.push_back(None);
        self.shared.cond.notify_one();
    }

    /// Atomically discard all queued, not-yet-consumed frames (barge-in).
    ///
    /// If the queue had already been stopped, the stop sentinel is re-queued
    /// so the consumer thread still terminates.
    pub fn interrupt(&self) {
        let mut state = self.shared.state.lock();
        state.items.clear();
        if state.stopped {
            state.items.push_back(None);
        }
        self.shared.cond.notify_one();
    }

    /// Join the consumer thread. Implies `stop`.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("playback thread panicked");
            }
        }
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("PlaybackQueue")
            .field("queued", &state.items.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

fn run_playback_loop(
    shared: Arc<Shared>,
    mut sink: Box<dyn AudioSink>,
    level_observer: Option<Box<dyn Fn(f32) + Send>>,
) {
    loop {
        let frame = {
            let mut state = shared.state.lock();
            loop {
                if let Some(item) = state.items.pop_front() {
                    break item;
                }
                shared.cond.wait(&mut state);
            }
        };

        let Some(frame) = frame else {
            // Stop sentinel.
            break;
        };

        if let Some(observer) = &level_observer {
            observer(signal_level(&frame));
        }

        // Write the full frame; the device may accept fewer bytes per call.
        let mut written = 0;
        while written < frame.len() {
            match sink.write(&frame[written..]) {
                Ok(0) => {
                    tracing::error!("playback sink accepted 0 bytes, terminating");
                    return;
                }
                Ok(n) => written += n,
                Err(e) => {
                    tracing::error!(error = %e, "playback write failed, terminating");
                    return;
                }
            }
        }
    }
}
