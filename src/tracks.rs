//! Media track identities, value-comparable track snapshots, and the
//! process-wide track registry.
//!
//! The registry is an explicit arena: it is owned by the enclosing SDK
//! context and passed around as an `Arc`, never accessed as ambient global
//! state, so lifetime stays explicit and teardown is clean in tests.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque, content-addressed track identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    /// Generate a fresh opaque id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Audio track.
    Audio,
    /// Video track.
    Video,
}

/// Whether a track was captured locally or received from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOrigin {
    /// Captured by a local device.
    Local,
    /// Received from the remote peer.
    Remote,
}

/// A live media track handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaTrack {
    /// Opaque track id.
    pub id: TrackId,
    /// Audio or video.
    pub kind: TrackKind,
    /// Local or remote.
    pub origin: TrackOrigin,
}

impl MediaTrack {
    /// Create a locally-captured track with a fresh id.
    pub fn local(kind: TrackKind) -> Self {
        Self { id: TrackId::new(), kind, origin: TrackOrigin::Local }
    }

    /// Create a remote track with a fresh id.
    pub fn remote(kind: TrackKind) -> Self {
        Self { id: TrackId::new(), kind, origin: TrackOrigin::Remote }
    }
}

/// One audio slot and one video slot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackPair {
    /// Audio slot.
    pub audio: Option<MediaTrack>,
    /// Video slot.
    pub video: Option<MediaTrack>,
}

impl TrackPair {
    /// Get the slot for a kind.
    pub fn get(&self, kind: TrackKind) -> Option<&MediaTrack> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    /// Replace the slot for a kind, returning the previous occupant.
    pub fn set(&mut self, kind: TrackKind, track: Option<MediaTrack>) -> Option<MediaTrack> {
        match kind {
            TrackKind::Audio => std::mem::replace(&mut self.audio, track),
            TrackKind::Video => std::mem::replace(&mut self.video, track),
        }
    }
}

/// Immutable snapshot of all live tracks on a session.
///
/// Replaced (not mutated) whenever any track changes; compared by value to
/// suppress duplicate notifications.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackSet {
    /// Locally captured tracks.
    pub local: TrackPair,
    /// Tracks received from the peer.
    pub remote: TrackPair,
}

/// Thread-safe mapping from track ids to live track handles.
///
/// Entries are added exactly once when a source or transceiver produces a
/// track and removed exactly once when the device/mode is disabled or the
/// session disposes; a second remove is a no-op.
#[derive(Debug, Default)]
pub struct TrackRegistry {
    inner: Mutex<HashMap<TrackId, MediaTrack>>,
}

impl TrackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a track under its id. Returns the previous entry if the id
    /// was already present.
    pub fn register(&self, track: MediaTrack) -> Option<MediaTrack> {
        self.inner.lock().insert(track.id.clone(), track)
    }

    /// Remove a track by id. Returns `None` if the id is not registered
    /// (second remove is a no-op).
    pub fn unregister(&self, id: &TrackId) -> Option<MediaTrack> {
        self.inner.lock().remove(id)
    }

    /// Look up a track by id.
    pub fn lookup(&self, id: &TrackId) -> Option<MediaTrack> {
        self.inner.lock().get(id).cloned()
    }

    /// Number of registered tracks.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the registry holds no tracks.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
