//! Two-party call signaling and negotiation.
//!
//! This crate drives the lifecycle of a one-to-one audio/video call: it
//! exchanges offer/answer/candidate messages with the remote participant over
//! a relay WebSocket, walks the negotiation state machine around a native
//! peer connection, and manages local media for the duration of the call.
//!
//! The layers, bottom up:
//!
//! - [`signaling`]: the JSON wire format carried over the channel.
//! - [`channel`]: the relay WebSocket transport ([`WebSocketChannel`]).
//! - [`state`]: the negotiation state machine and per-call session data.
//! - [`peer`]: [`PeerSession`], which drives one native connection through
//!   negotiation, buffering early remote candidates and forwarding local
//!   ones.
//! - [`webrtc`](self::webrtc): the production [`PeerBackend`] over an
//!   `RTCPeerConnection`.
//! - [`controller`]: [`CallController`], the embedder-facing entry point.
//!
//! The embedder supplies capture media through [`MediaSource`] and receives
//! UI notifications through [`CallObserver`]; everything else is handled
//! internally. At most one call is active per controller at a time.

pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod state;
pub mod webrtc;

#[cfg(test)]
pub(crate) mod test_utils;

pub use channel::{ChannelEvent, SignalingChannel, WebSocketChannel};
pub use config::CallConfig;
pub use controller::{CallController, CallObserver, CallOptions};
pub use error::{CallError, MediaAccessKind};
pub use media::{LocalMedia, LocalTrack, MediaKind, MediaSource, RemoteTrack};
pub use peer::{Connectivity, PeerBackend, PeerEvent, PeerSession, SessionEvent};
pub use signaling::{IceCandidate, SignalingMessage};
pub use state::{
    CallRole, CallSession, EndReason, LocalMediaState, NegotiationState, NegotiationTransition,
};

pub use self::webrtc::WebRtcBackend;
