//! Peer session: wraps one native peer connection and drives the
//! offer/answer/candidate protocol.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{Mutex, RwLock};

use crate::channel::SignalingChannel;
use crate::error::CallError;
use crate::media::RemoteTrack;
use crate::signaling::{IceCandidate, SignalingMessage};
use crate::state::{NegotiationState, NegotiationTransition};

/// Continuous connectivity signal observed on the native connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl Connectivity {
    /// Whether this state must terminate the call. There is no automatic
    /// reconnection attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Events emitted by a peer backend as the native connection progresses.
#[derive(Debug)]
pub enum PeerEvent {
    /// A locally discovered ICE candidate, forwarded over the channel
    /// individually and immediately.
    LocalCandidate(IceCandidate),
    /// The remote media stream arrived.
    RemoteTrack(RemoteTrack),
    /// The connectivity signal changed.
    Connectivity(Connectivity),
}

/// What a backend event means for the call, once the session has applied it.
#[derive(Debug)]
pub enum SessionEvent {
    /// First remote track of this connection; hand it to the UI layer.
    RemoteTrack(RemoteTrack),
    /// Negotiation completed and media is flowing.
    Connected,
    /// Connectivity degraded past recovery; tear the call down.
    Terminated,
}

/// Seam over the native peer connection.
///
/// The description-producing calls both create and apply the local
/// description before returning the SDP. Backends report candidates, tracks
/// and connectivity through the [`PeerEvent`] sender they were built with.
#[async_trait]
pub trait PeerBackend: Send + Sync {
    async fn create_offer(&self) -> Result<String, CallError>;
    async fn create_answer(&self) -> Result<String, CallError>;
    async fn set_remote_offer(&self, sdp: &str) -> Result<(), CallError>;
    async fn set_remote_answer(&self, sdp: &str) -> Result<(), CallError>;
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;
    async fn close(&self);
}

/// Drives one native peer connection through the negotiation state machine.
///
/// Lifetime is bounded by the owning call session's non-terminal states;
/// `close` is idempotent and final.
pub struct PeerSession {
    backend: Arc<dyn PeerBackend>,
    channel: Arc<dyn SignalingChannel>,
    state: RwLock<NegotiationState>,
    /// Serializes offer/answer creation so a concurrent second call observes
    /// the state left by the first instead of racing it.
    negotiation: Mutex<()>,
    /// Remote candidates that arrived before a session description existed,
    /// replayed in arrival order once one does.
    pending_candidates: Mutex<Vec<IceCandidate>>,
    remote_track_seen: AtomicBool,
}

impl PeerSession {
    pub fn new(backend: Arc<dyn PeerBackend>, channel: Arc<dyn SignalingChannel>) -> Self {
        Self {
            backend,
            channel,
            state: RwLock::new(NegotiationState::default()),
            negotiation: Mutex::new(()),
            pending_candidates: Mutex::new(Vec::new()),
            remote_track_seen: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> NegotiationState {
        self.state.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_connected()
    }

    /// Create the local offer, apply it, and send it over the channel.
    ///
    /// Valid only from the idle state; a second call, concurrent or not,
    /// fails with a negotiation error so exactly one offer leaves per call.
    pub async fn create_and_send_offer(&self) -> Result<(), CallError> {
        let _negotiating = self.negotiation.lock().await;
        if !self.state.read().await.is_idle() {
            return Err(CallError::Negotiation(
                "an offer was already created for this session".into(),
            ));
        }

        let sdp = self.backend.create_offer().await?;
        self.apply(NegotiationTransition::OfferSent).await?;
        self.channel.send(SignalingMessage::Offer { sdp }).await;
        Ok(())
    }

    /// Apply a remote offer, then create, apply and send exactly one answer.
    ///
    /// An offer arriving in any other state is a protocol violation: logged
    /// and dropped.
    pub async fn handle_remote_offer(&self, sdp: String) -> Result<(), CallError> {
        let _negotiating = self.negotiation.lock().await;
        if !self.state.read().await.is_idle() {
            warn!(
                "Ignoring remote offer in state {:?}",
                *self.state.read().await
            );
            return Ok(());
        }

        self.backend.set_remote_offer(&sdp).await?;
        self.apply(NegotiationTransition::RemoteOfferApplied).await?;
        self.flush_pending_candidates().await;

        let answer = self.backend.create_answer().await?;
        self.apply(NegotiationTransition::AnswerSent).await?;
        self.channel
            .send(SignalingMessage::Answer { sdp: answer })
            .await;
        Ok(())
    }

    /// Apply a remote answer to our outstanding offer.
    ///
    /// Valid only while awaiting one; anywhere else it is logged and ignored
    /// rather than crashing the call.
    pub async fn handle_remote_answer(&self, sdp: String) -> Result<(), CallError> {
        let _negotiating = self.negotiation.lock().await;
        if !self.state.read().await.awaiting_remote_answer() {
            warn!(
                "Ignoring remote answer in state {:?}",
                *self.state.read().await
            );
            return Ok(());
        }

        self.backend.set_remote_answer(&sdp).await?;
        self.apply(NegotiationTransition::RemoteAnswerApplied)
            .await?;
        self.flush_pending_candidates().await;
        Ok(())
    }

    /// Append a remote candidate, or buffer it until a session description
    /// exists (trickle ICE can outrun negotiation).
    pub async fn handle_remote_candidate(&self, candidate: IceCandidate) {
        if self.state.read().await.has_remote_description() {
            if let Err(e) = self.backend.add_remote_candidate(candidate).await {
                warn!("Failed to add remote candidate: {e}");
            }
        } else {
            let mut pending = self.pending_candidates.lock().await;
            pending.push(candidate);
            debug!("Buffered early remote candidate ({} pending)", pending.len());
        }
    }

    /// Apply one backend event against the session state. Returns the
    /// call-level consequence, if any.
    pub async fn process_backend_event(&self, event: PeerEvent) -> Option<SessionEvent> {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                // Forwarded one at a time, never batched: batching risks
                // losing candidates when the channel closes early.
                self.channel
                    .send(SignalingMessage::Candidate { candidate })
                    .await;
                None
            }
            PeerEvent::RemoteTrack(track) => {
                if self.remote_track_seen.swap(true, Ordering::SeqCst) {
                    warn!("Ignoring additional remote track {}", track.id);
                    return None;
                }
                Some(SessionEvent::RemoteTrack(track))
            }
            PeerEvent::Connectivity(connectivity) => self.handle_connectivity(connectivity).await,
        }
    }

    async fn handle_connectivity(&self, connectivity: Connectivity) -> Option<SessionEvent> {
        debug!("Connectivity changed: {connectivity:?}");
        let mut state = self.state.write().await;
        if state.is_closed() {
            return None;
        }
        match connectivity {
            Connectivity::Connected => {
                if state.is_connected() {
                    return None;
                }
                match state.apply_transition(NegotiationTransition::ConnectivityEstablished) {
                    Ok(()) => {
                        info!("Peer session connected");
                        Some(SessionEvent::Connected)
                    }
                    Err(e) => {
                        warn!("Ignoring connectivity signal: {e}");
                        None
                    }
                }
            }
            c if c.is_terminal() => {
                warn!("Connectivity lost ({c:?}), terminating session");
                Some(SessionEvent::Terminated)
            }
            _ => None,
        }
    }

    /// Release the native connection. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.write().await;
            if state.is_closed() {
                return;
            }
            // Closing is defined from every non-terminal state.
            if let Err(e) = state.apply_transition(NegotiationTransition::Closed) {
                warn!("Close transition rejected: {e}");
                return;
            }
        }
        self.backend.close().await;
        debug!("Peer session closed");
    }

    async fn apply(&self, transition: NegotiationTransition) -> Result<(), CallError> {
        let mut state = self.state.write().await;
        state.apply_transition(transition)?;
        debug!("Negotiation state is now {:?}", *state);
        Ok(())
    }

    async fn flush_pending_candidates(&self) {
        let pending: Vec<_> = self.pending_candidates.lock().await.drain(..).collect();
        if pending.is_empty() {
            return;
        }
        debug!("Replaying {} buffered remote candidates", pending.len());
        for candidate in pending {
            if let Err(e) = self.backend.add_remote_candidate(candidate).await {
                warn!("Failed to replay buffered candidate: {e}");
            }
        }
    }
}
