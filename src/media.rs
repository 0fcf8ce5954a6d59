//! Local and remote media track handles.
//!
//! Capture devices are platform territory: the embedder supplies local media
//! through the [`MediaSource`] trait and receives remote media through the
//! controller's observer. This crate only manages track lifetime and the
//! enabled flags driven by the mute/video toggles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Handle to one local capture track.
///
/// `enabled` gates whether the embedder feeds samples into the native track;
/// toggling it is a pure local operation. `stop` releases the capture for
/// good and is idempotent.
pub struct LocalTrack {
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    native: Option<Arc<dyn TrackLocal + Send + Sync>>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, native: Option<Arc<dyn TrackLocal + Send + Sync>>) -> Self {
        Self {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            native,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.enabled.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The native track registered on the peer connection, when the embedder
    /// provided one.
    pub fn native(&self) -> Option<&Arc<dyn TrackLocal + Send + Sync>> {
        self.native.as_ref()
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .field("native", &self.native.is_some())
            .finish()
    }
}

/// The local media acquired for one call: audio always, video optionally.
#[derive(Debug, Clone)]
pub struct LocalMedia {
    pub audio: Arc<LocalTrack>,
    pub video: Option<Arc<LocalTrack>>,
}

impl LocalMedia {
    pub fn tracks(&self) -> Vec<Arc<LocalTrack>> {
        let mut tracks = vec![self.audio.clone()];
        if let Some(video) = &self.video {
            tracks.push(video.clone());
        }
        tracks
    }

    /// Stop every local track. Idempotent.
    pub fn stop_all(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

/// A remote media track surfaced to the UI layer, provided exactly once per
/// connection lifetime.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
    /// The native track, absent only in tests.
    pub native: Option<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("native", &self.native.is_some())
            .finish()
    }
}

/// Acquisition seam for local capture media.
///
/// Implementations must fail with [`CallError::MediaAccess`] carrying the
/// sub-reason, so the controller can surface permission problems and missing
/// devices as distinct messages.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, video: bool) -> Result<LocalMedia, CallError>;
}
