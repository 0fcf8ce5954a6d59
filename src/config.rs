//! Configuration for the call controller.

use std::time::Duration;

/// Configuration for a [`crate::CallController`].
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Base URL of the signaling relay, e.g. `wss://host/ws/call`. The
    /// per-call endpoint is derived from it with the room id and token.
    pub signaling_url: String,
    /// STUN/TURN servers handed to the native peer connection.
    pub ice_servers: Vec<String>,
    /// Bounded wait for the session to reach connected after start. `None`
    /// disables the deadline; the default matches typical ICE settle time.
    pub negotiation_timeout: Option<Duration>,
}

impl CallConfig {
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            ..Default::default()
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: String::new(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            negotiation_timeout: Some(Duration::from_secs(30)),
        }
    }
}
