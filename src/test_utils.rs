//! Shared fakes for exercising the protocol layers without a network or a
//! native peer connection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::channel::SignalingChannel;
use crate::controller::CallObserver;
use crate::error::{CallError, MediaAccessKind};
use crate::media::{LocalMedia, LocalTrack, MediaKind, MediaSource, RemoteTrack};
use crate::peer::PeerBackend;
use crate::signaling::{IceCandidate, SignalingMessage};
use crate::state::{EndReason, LocalMediaState};

/// In-memory [`PeerBackend`] that records every call made against it.
#[derive(Default)]
pub(crate) struct FakeBackend {
    ops: Mutex<Vec<&'static str>>,
    candidates: Mutex<Vec<IceCandidate>>,
    close_count: AtomicUsize,
    fail_offers: AtomicBool,
}

impl FakeBackend {
    pub(crate) fn ops(&self) -> Vec<&'static str> {
        self.ops.lock().unwrap().clone()
    }

    pub(crate) fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Make every subsequent `create_offer` fail.
    pub(crate) fn fail_offers(&self) {
        self.fail_offers.store(true, Ordering::SeqCst);
    }

    fn record(&self, op: &'static str) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl PeerBackend for FakeBackend {
    async fn create_offer(&self) -> Result<String, CallError> {
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(CallError::Backend("offer creation failed".into()));
        }
        self.record("create_offer");
        Ok("v=0 local offer".to_string())
    }

    async fn create_answer(&self) -> Result<String, CallError> {
        self.record("create_answer");
        Ok("v=0 local answer".to_string())
    }

    async fn set_remote_offer(&self, _sdp: &str) -> Result<(), CallError> {
        self.record("set_remote_offer");
        Ok(())
    }

    async fn set_remote_answer(&self, _sdp: &str) -> Result<(), CallError> {
        self.record("set_remote_answer");
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// [`SignalingChannel`] that records outbound messages instead of sending.
#[derive(Default)]
pub(crate) struct RecordingChannel {
    sent: Mutex<Vec<SignalingMessage>>,
    close_count: AtomicUsize,
}

impl RecordingChannel {
    pub(crate) fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingChannel for RecordingChannel {
    async fn send(&self, message: SignalingMessage) {
        self.sent.lock().unwrap().push(message);
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// [`MediaSource`] producing tracks with no native handles, or a configured
/// acquisition failure. Keeps a handle to everything it handed out so tests
/// can assert the tracks were stopped.
#[derive(Default)]
pub(crate) struct FakeMediaSource {
    fail_with: Option<MediaAccessKind>,
    acquired: Mutex<Vec<LocalMedia>>,
}

impl FakeMediaSource {
    pub(crate) fn failing(kind: MediaAccessKind) -> Self {
        Self {
            fail_with: Some(kind),
            acquired: Mutex::new(Vec::new()),
        }
    }

    /// The media returned by the most recent `acquire`.
    pub(crate) fn last_media(&self) -> Option<LocalMedia> {
        self.acquired.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self, video: bool) -> Result<LocalMedia, CallError> {
        if let Some(kind) = self.fail_with {
            return Err(CallError::MediaAccess(kind));
        }
        let media = LocalMedia {
            audio: Arc::new(LocalTrack::new(MediaKind::Audio, None)),
            video: video.then(|| Arc::new(LocalTrack::new(MediaKind::Video, None))),
        };
        self.acquired.lock().unwrap().push(media.clone());
        Ok(media)
    }
}

/// [`CallObserver`] that records every notification.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    local_media_count: AtomicUsize,
    remote_tracks: Mutex<Vec<String>>,
    media_states: Mutex<Vec<LocalMediaState>>,
    ended: Mutex<Vec<EndReason>>,
}

impl RecordingObserver {
    pub(crate) fn local_media_count(&self) -> usize {
        self.local_media_count.load(Ordering::SeqCst)
    }

    pub(crate) fn remote_tracks(&self) -> Vec<String> {
        self.remote_tracks.lock().unwrap().clone()
    }

    pub(crate) fn media_states(&self) -> Vec<LocalMediaState> {
        self.media_states.lock().unwrap().clone()
    }

    pub(crate) fn ended(&self) -> Vec<EndReason> {
        self.ended.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallObserver for RecordingObserver {
    async fn on_local_media(&self, _media: &LocalMedia) {
        self.local_media_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_remote_track(&self, track: &RemoteTrack) {
        self.remote_tracks.lock().unwrap().push(track.id.clone());
    }

    async fn on_media_state(&self, state: LocalMediaState) {
        self.media_states.lock().unwrap().push(state);
    }

    async fn on_call_ended(&self, reason: EndReason) {
        self.ended.lock().unwrap().push(reason);
    }
}
