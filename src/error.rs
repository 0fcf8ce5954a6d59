//! Call-related error types.

use thiserror::Error;

/// Why local media acquisition failed.
///
/// Surfaced to the user as distinct messages, so the two cases stay separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAccessKind {
    /// The user (or platform policy) denied access to the capture devices.
    PermissionDenied,
    /// No matching capture device is present.
    DeviceNotFound,
}

impl std::fmt::Display for MediaAccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::DeviceNotFound => write!(f, "no capture device found"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("media access failed: {0}")]
    MediaAccess(MediaAccessKind),

    #[error("signaling channel connection failed: {0}")]
    Connection(String),

    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid negotiation state transition: {0}")]
    InvalidTransition(#[from] crate::state::InvalidTransition),

    #[error("peer connection error: {0}")]
    Backend(String),

    #[error("no active call")]
    NotActive,
}
