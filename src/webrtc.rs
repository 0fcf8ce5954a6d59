//! Native peer connection backend over the `webrtc` crate.
//!
//! Owns one `RTCPeerConnection`, registers the local capture tracks on it,
//! and funnels candidate/track/connectivity callbacks into the peer-session
//! event queue. The protocol layer never touches the native connection
//! directly; everything goes through [`crate::peer::PeerBackend`].

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::config::CallConfig;
use crate::error::CallError;
use crate::media::{LocalMedia, MediaKind, RemoteTrack};
use crate::peer::{Connectivity, PeerBackend, PeerEvent};
use crate::signaling::IceCandidate;

/// [`PeerBackend`] implementation over `RTCPeerConnection`.
pub struct WebRtcBackend {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcBackend {
    /// Build the native connection, register the local tracks, and wire its
    /// callbacks into `events`.
    pub async fn new(
        config: &CallConfig,
        media: &LocalMedia,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(backend_err)?;
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(backend_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(backend_err)?,
        );

        for track in media.tracks() {
            if let Some(native) = track.native() {
                pc.add_track(native.clone()).await.map_err(backend_err)?;
                debug!("Registered local {} track", track.kind().as_str());
            }
        }

        {
            let tx = events.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                let tx = tx.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        // End of gathering.
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = tx.send(PeerEvent::LocalCandidate(candidate_from_init(init)));
                        }
                        Err(e) => warn!("Failed to serialize local candidate: {e}"),
                    }
                })
            }));
        }

        {
            let tx = events.clone();
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(PeerEvent::RemoteTrack(remote_track(track)));
                })
            }));
        }

        {
            let tx = events;
            pc.on_ice_connection_state_change(Box::new(move |state| {
                let connectivity = map_connectivity(state);
                let tx = tx.clone();
                Box::pin(async move {
                    if let Some(connectivity) = connectivity {
                        let _ = tx.send(PeerEvent::Connectivity(connectivity));
                    }
                })
            }));
        }

        Ok(Self { pc })
    }
}

#[async_trait]
impl PeerBackend for WebRtcBackend {
    async fn create_offer(&self) -> Result<String, CallError> {
        let offer = self.pc.create_offer(None).await.map_err(backend_err)?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(backend_err)?;
        Ok(sdp)
    }

    async fn create_answer(&self) -> Result<String, CallError> {
        let answer = self.pc.create_answer(None).await.map_err(backend_err)?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(backend_err)?;
        Ok(sdp)
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<(), CallError> {
        let desc = RTCSessionDescription::offer(sdp.to_string()).map_err(backend_err)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(backend_err)
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), CallError> {
        let desc = RTCSessionDescription::answer(sdp.to_string()).map_err(backend_err)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(backend_err)
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.pc
            .add_ice_candidate(init_from_candidate(candidate))
            .await
            .map_err(backend_err)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {e}");
        }
    }
}

fn backend_err(e: webrtc::Error) -> CallError {
    CallError::Backend(e.to_string())
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn init_from_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn remote_track(track: Arc<TrackRemote>) -> RemoteTrack {
    let kind = match track.kind() {
        RTPCodecType::Video => MediaKind::Video,
        _ => MediaKind::Audio,
    };
    RemoteTrack {
        id: track.id(),
        kind,
        native: Some(track),
    }
}

fn map_connectivity(state: RTCIceConnectionState) -> Option<Connectivity> {
    match state {
        RTCIceConnectionState::New => Some(Connectivity::New),
        RTCIceConnectionState::Checking => Some(Connectivity::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(Connectivity::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(Connectivity::Disconnected),
        RTCIceConnectionState::Failed => Some(Connectivity::Failed),
        RTCIceConnectionState::Closed => Some(Connectivity::Closed),
        RTCIceConnectionState::Unspecified => None,
    }
}
