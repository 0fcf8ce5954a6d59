//! Call controller: orchestrates local media, one peer session and one
//! signaling channel per call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{RwLock, mpsc};

use crate::channel::{ChannelEvent, SignalingChannel, WebSocketChannel};
use crate::config::CallConfig;
use crate::error::CallError;
use crate::media::{LocalMedia, MediaSource, RemoteTrack};
use crate::peer::{PeerBackend, PeerEvent, PeerSession, SessionEvent};
use crate::signaling::SignalingMessage;
use crate::state::{CallRole, CallSession, EndReason, LocalMediaState};
use crate::webrtc::WebRtcBackend;

/// Notifications for the UI rendering layer.
///
/// The controller subscribes the observer once at construction; rendering is
/// the embedder's concern.
#[async_trait]
pub trait CallObserver: Send + Sync {
    /// Local capture media acquired; attach the local preview.
    async fn on_local_media(&self, media: &LocalMedia);
    /// The remote stream arrived. Fires exactly once per call.
    async fn on_remote_track(&self, track: &RemoteTrack);
    /// A mute/video toggle changed the local media state.
    async fn on_media_state(&self, state: LocalMediaState);
    /// The call terminated. Fires exactly once, whatever the trigger.
    async fn on_call_ended(&self, reason: EndReason);
}

/// Options for starting a call.
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    /// Whether to acquire a local video track alongside audio.
    pub video: bool,
    /// Whether this participant initiates the offer.
    pub initiator: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            video: true,
            initiator: false,
        }
    }
}

impl CallOptions {
    /// We place the call and send the offer.
    pub fn outgoing() -> Self {
        Self {
            video: true,
            initiator: true,
        }
    }

    /// We were invited and answer a received offer.
    pub fn incoming() -> Self {
        Self::default()
    }

    pub fn audio_only(mut self) -> Self {
        self.video = false;
        self
    }
}

/// Everything owned by one running call. Dropped as a unit at teardown.
struct ActiveCall {
    session: RwLock<CallSession>,
    peer: Arc<PeerSession>,
    channel: Arc<dyn SignalingChannel>,
    media: LocalMedia,
    observer: Arc<dyn CallObserver>,
    ended: AtomicBool,
}

impl ActiveCall {
    /// The single teardown path. Every trigger funnels here and only the
    /// first one releases anything; the rest are no-ops.
    async fn teardown(&self, reason: EndReason, send_end: bool) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Call ended: {reason}");
        if send_end {
            self.channel.send(SignalingMessage::CallEnd).await;
        }
        self.media.stop_all();
        self.peer.close().await;
        self.channel.close().await;
        self.observer.on_call_ended(reason).await;
    }
}

/// Orchestrates the lifecycle of at most one call at a time.
pub struct CallController {
    config: CallConfig,
    media_source: Arc<dyn MediaSource>,
    observer: Arc<dyn CallObserver>,
    active: Arc<RwLock<Option<Arc<ActiveCall>>>>,
}

impl CallController {
    pub fn new(
        config: CallConfig,
        media_source: Arc<dyn MediaSource>,
        observer: Arc<dyn CallObserver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            media_source,
            observer,
            active: Arc::new(RwLock::new(None)),
        })
    }

    /// Start a call in the given room.
    ///
    /// Acquires local media, connects the signaling channel, and, when this
    /// participant is the initiator, immediately creates and sends the
    /// offer. Fails with [`CallError::MediaAccess`] or
    /// [`CallError::Connection`] before any call state is created.
    pub async fn start(
        &self,
        chat_id: &str,
        token: &str,
        options: CallOptions,
    ) -> Result<(), CallError> {
        self.ensure_no_active_call().await?;

        let media = self.media_source.acquire(options.video).await?;
        self.observer.on_local_media(&media).await;

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let backend: Arc<dyn PeerBackend> =
            match WebRtcBackend::new(&self.config, &media, peer_tx).await {
                Ok(backend) => Arc::new(backend),
                Err(e) => return Err(self.abort_start(media, None, e).await),
            };

        let url = WebSocketChannel::endpoint_url(&self.config.signaling_url, chat_id, token);
        let (channel, channel_rx) = match WebSocketChannel::connect(&url).await {
            Ok(parts) => parts,
            Err(e) => return Err(self.abort_start(media, Some(backend), e).await),
        };

        self.attach(
            chat_id, token, options, media, backend, channel, peer_rx, channel_rx,
        )
        .await
    }

    /// Test entry: same lifecycle as `start` with injected transport parts.
    #[cfg(test)]
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn start_with(
        &self,
        chat_id: &str,
        token: &str,
        options: CallOptions,
        backend: Arc<dyn PeerBackend>,
        channel: Arc<dyn SignalingChannel>,
        peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
        channel_rx: mpsc::Receiver<ChannelEvent>,
    ) -> Result<(), CallError> {
        self.ensure_no_active_call().await?;
        let media = self.media_source.acquire(options.video).await?;
        self.observer.on_local_media(&media).await;
        self.attach(
            chat_id, token, options, media, backend, channel, peer_rx, channel_rx,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn attach(
        &self,
        chat_id: &str,
        token: &str,
        options: CallOptions,
        media: LocalMedia,
        backend: Arc<dyn PeerBackend>,
        channel: Arc<dyn SignalingChannel>,
        peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
        channel_rx: mpsc::Receiver<ChannelEvent>,
    ) -> Result<(), CallError> {
        let role = if options.initiator {
            CallRole::Caller
        } else {
            CallRole::Callee
        };
        info!("Starting call in room {chat_id} as {role:?}");

        let session = CallSession::new(chat_id, token, role, options.video);
        let peer = Arc::new(PeerSession::new(backend, channel.clone()));
        let call = Arc::new(ActiveCall {
            session: RwLock::new(session),
            peer: peer.clone(),
            channel,
            media,
            observer: self.observer.clone(),
            ended: AtomicBool::new(false),
        });
        {
            let mut slot = self.active.write().await;
            if slot.is_some() {
                drop(slot);
                // Lost the slot to a concurrent start. The running call stays
                // untouched, so release quietly instead of through teardown.
                call.media.stop_all();
                call.peer.close().await;
                call.channel.close().await;
                return Err(CallError::Negotiation("a call is already active".into()));
            }
            *slot = Some(call.clone());
        }

        tokio::spawn(run_event_loop(
            call.clone(),
            self.active.clone(),
            peer_rx,
            channel_rx,
            self.config.negotiation_timeout,
        ));

        if options.initiator {
            if let Err(e) = peer.create_and_send_offer().await {
                finish(&call, &self.active, EndReason::ConnectionLost, false).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// End the call: signal the peer, stop local tracks, release the peer
    /// session and the channel. Safe to call concurrently with any remote
    /// teardown trigger; resources are released exactly once.
    pub async fn end_call(&self, reason: EndReason) -> Result<(), CallError> {
        let call = self
            .active
            .write()
            .await
            .take()
            .ok_or(CallError::NotActive)?;
        call.teardown(reason, true).await;
        Ok(())
    }

    /// Flip the local audio track. Pure local operation, no signaling.
    pub async fn toggle_mute(&self) -> Result<LocalMediaState, CallError> {
        let call = self.current().await?;
        let enabled = !call.media.audio.is_enabled();
        call.media.audio.set_enabled(enabled);
        let state = {
            let mut session = call.session.write().await;
            session.media.audio_enabled = enabled;
            session.media
        };
        debug!("Audio {}", if enabled { "unmuted" } else { "muted" });
        call.observer.on_media_state(state).await;
        Ok(state)
    }

    /// Flip the local video track. Pure local operation, no signaling.
    pub async fn toggle_video(&self) -> Result<LocalMediaState, CallError> {
        let call = self.current().await?;
        let Some(video) = call.media.video.as_ref() else {
            debug!("No local video track to toggle");
            return Ok(call.session.read().await.media);
        };
        let enabled = !video.is_enabled();
        video.set_enabled(enabled);
        let state = {
            let mut session = call.session.write().await;
            session.media.video_enabled = enabled;
            session.media
        };
        debug!("Video {}", if enabled { "enabled" } else { "disabled" });
        call.observer.on_media_state(state).await;
        Ok(state)
    }

    pub async fn has_active_call(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Snapshot of the current call session, if one is running.
    pub async fn session(&self) -> Option<CallSession> {
        match self.active.read().await.as_ref() {
            Some(call) => Some(call.session.read().await.clone()),
            None => None,
        }
    }

    async fn current(&self) -> Result<Arc<ActiveCall>, CallError> {
        self.active
            .read()
            .await
            .clone()
            .ok_or(CallError::NotActive)
    }

    async fn ensure_no_active_call(&self) -> Result<(), CallError> {
        if self.active.read().await.is_some() {
            return Err(CallError::Negotiation("a call is already active".into()));
        }
        Ok(())
    }

    /// Release everything a failed start acquired. The observer already saw
    /// the local media, so it is also told the attempt is over.
    async fn abort_start(
        &self,
        media: LocalMedia,
        backend: Option<Arc<dyn PeerBackend>>,
        error: CallError,
    ) -> CallError {
        warn!("Call start failed: {error}");
        media.stop_all();
        if let Some(backend) = backend {
            backend.close().await;
        }
        self.observer.on_call_ended(EndReason::ConnectionLost).await;
        error
    }
}

/// Remove the call from the controller slot and run its teardown.
async fn finish(
    call: &Arc<ActiveCall>,
    active: &Arc<RwLock<Option<Arc<ActiveCall>>>>,
    reason: EndReason,
    send_end: bool,
) {
    active.write().await.take();
    call.teardown(reason, send_end).await;
}

/// One event loop per call: multiplexes inbound signaling, backend events
/// and the negotiation deadline. Signaling messages are processed strictly
/// in arrival order, one at a time.
async fn run_event_loop(
    call: Arc<ActiveCall>,
    active: Arc<RwLock<Option<Arc<ActiveCall>>>>,
    mut peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    mut channel_rx: mpsc::Receiver<ChannelEvent>,
    negotiation_timeout: Option<Duration>,
) {
    let deadline = async {
        match negotiation_timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut deadline_armed = true;

    loop {
        tokio::select! {
            _ = &mut deadline, if deadline_armed => {
                // Locally detected failure: tell the peer rather than leaving
                // it to wait out its own deadline.
                warn!("Negotiation deadline elapsed before connection");
                finish(&call, &active, EndReason::ConnectionLost, true).await;
                return;
            }
            event = channel_rx.recv() => {
                let Some(event) = event else {
                    finish(&call, &active, EndReason::ConnectionLost, false).await;
                    return;
                };
                match event {
                    ChannelEvent::Message(message) => {
                        if let Some(reason) = dispatch_message(&call, message).await {
                            finish(&call, &active, reason, false).await;
                            return;
                        }
                    }
                    ChannelEvent::Closed { expected } => {
                        if !expected {
                            warn!("Signaling channel dropped unexpectedly");
                            finish(&call, &active, EndReason::ConnectionLost, false).await;
                        }
                        return;
                    }
                }
            }
            event = peer_rx.recv() => {
                let Some(event) = event else { return };
                match call.peer.process_backend_event(event).await {
                    Some(SessionEvent::RemoteTrack(track)) => {
                        call.observer.on_remote_track(&track).await;
                    }
                    Some(SessionEvent::Connected) => {
                        deadline_armed = false;
                    }
                    Some(SessionEvent::Terminated) => {
                        // The media path died but the signaling channel may
                        // still be up; tell the peer.
                        finish(&call, &active, EndReason::ConnectionLost, true).await;
                        return;
                    }
                    None => {}
                }
            }
        }
    }
}

/// Route one inbound message. Returns the end reason when the message
/// terminates the call.
async fn dispatch_message(call: &Arc<ActiveCall>, message: SignalingMessage) -> Option<EndReason> {
    match message {
        SignalingMessage::Offer { sdp } => {
            if let Err(e) = call.peer.handle_remote_offer(sdp).await {
                warn!("Failed to answer remote offer: {e}");
            }
            None
        }
        SignalingMessage::Answer { sdp } => {
            if let Err(e) = call.peer.handle_remote_answer(sdp).await {
                warn!("Failed to apply remote answer: {e}");
            }
            None
        }
        SignalingMessage::Candidate { candidate } => {
            call.peer.handle_remote_candidate(candidate).await;
            None
        }
        SignalingMessage::CallEnd => Some(EndReason::RemoteEnded),
        SignalingMessage::CallDeclined => Some(EndReason::RemoteDeclined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeBackend, FakeMediaSource, RecordingChannel, RecordingObserver};

    /// Two starts racing past the early check must not overwrite the active
    /// slot: the second one loses at the slot itself and releases what it
    /// acquired, leaving the first call untouched.
    #[tokio::test]
    async fn test_attach_rejects_second_call_and_releases_the_loser() {
        let observer = Arc::new(RecordingObserver::default());
        let source = Arc::new(FakeMediaSource::default());
        let controller =
            CallController::new(CallConfig::default(), source.clone(), observer.clone());

        let (_peer_tx1, peer_rx1) = mpsc::unbounded_channel();
        let (_chan_tx1, chan_rx1) = mpsc::channel(16);
        controller
            .start_with(
                "room-1",
                "tok",
                CallOptions::outgoing(),
                Arc::new(FakeBackend::default()),
                Arc::new(RecordingChannel::default()),
                peer_rx1,
                chan_rx1,
            )
            .await
            .unwrap();

        // A second start that already acquired its resources before hitting
        // the slot.
        let media = source.acquire(true).await.unwrap();
        let backend: Arc<FakeBackend> = Arc::new(FakeBackend::default());
        let channel: Arc<RecordingChannel> = Arc::new(RecordingChannel::default());
        let (_peer_tx2, peer_rx2) = mpsc::unbounded_channel();
        let (_chan_tx2, chan_rx2) = mpsc::channel(16);
        let result = controller
            .attach(
                "room-2",
                "tok",
                CallOptions::outgoing(),
                media.clone(),
                backend.clone(),
                channel.clone(),
                peer_rx2,
                chan_rx2,
            )
            .await;
        assert!(matches!(result, Err(CallError::Negotiation(_))));

        // The first call is still the active one.
        assert!(controller.has_active_call().await);
        assert_eq!(controller.session().await.unwrap().chat_id, "room-1");

        // The loser's resources are released without a termination event.
        assert!(media.audio.is_stopped());
        assert_eq!(backend.close_count(), 1);
        assert_eq!(channel.close_count(), 1);
        assert!(observer.ended().is_empty());
    }
}
