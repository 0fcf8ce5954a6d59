//! Wire format for the signaling channel.
//!
//! Every payload exchanged over the channel is one [`SignalingMessage`],
//! encoded as UTF-8 JSON with a `type` discriminator:
//!
//! ```json
//! {"type":"offer","sdp":"v=0 ..."}
//! {"type":"candidate","candidate":{"candidate":"candidate:1 ...","sdpMid":"0"}}
//! {"type":"call_end"}
//! ```
//!
//! The relay forwards messages verbatim between the two participants; this
//! module only defines the payload shape, not the transport.

use serde::{Deserialize, Serialize};

use crate::error::CallError;

/// A structured ICE candidate as carried in `candidate` messages.
///
/// Field names on the wire follow the native `RTCIceCandidateInit` JSON
/// shape, so candidates can be handed to the peer connection unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate string (e.g. "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host").
    pub candidate: String,
    /// SDP media stream identification.
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// SDP media line index.
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment for ICE.
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_mline_index(mut self, index: u16) -> Self {
        self.sdp_mline_index = Some(index);
        self
    }

    pub fn with_username_fragment(mut self, ufrag: impl Into<String>) -> Self {
        self.username_fragment = Some(ufrag.into());
        self
    }
}

/// Control messages carried over the signaling channel for exactly one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Session description offer from the call initiator.
    Offer { sdp: String },
    /// Session description answer from the receiver.
    Answer { sdp: String },
    /// One trickled ICE candidate.
    Candidate { candidate: IceCandidate },
    /// Explicit hang-up by either side.
    CallEnd,
    /// The receiver declined before answering.
    CallDeclined,
}

impl SignalingMessage {
    /// Wire name of the message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::CallEnd => "call_end",
            Self::CallDeclined => "call_declined",
        }
    }

    pub fn to_json(&self) -> Result<String, CallError> {
        serde_json::to_string(self).map_err(|e| CallError::Protocol(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, CallError> {
        serde_json::from_str(raw).map_err(|e| CallError::Protocol(e.to_string()))
    }
}
