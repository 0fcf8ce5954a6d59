//! Negotiation state machine and per-call session data.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which side of the call this participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallRole {
    /// Sends the offer.
    Caller,
    /// Answers a received offer.
    Callee,
}

/// Why a call ended, as reported to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserInitiated,
    RemoteEnded,
    RemoteDeclined,
    ConnectionLost,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserInitiated => write!(f, "user_initiated"),
            Self::RemoteEnded => write!(f, "remote_ended"),
            Self::RemoteDeclined => write!(f, "remote_declined"),
            Self::ConnectionLost => write!(f, "connection_lost"),
        }
    }
}

/// Enabled flags for the local capture tracks.
///
/// Mutated only by explicit local toggle actions, never by remote messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalMediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl LocalMediaState {
    pub fn new(video: bool) -> Self {
        Self {
            audio_enabled: true,
            video_enabled: video,
        }
    }
}

/// Current negotiation state of a peer session.
///
/// Caller path: Idle → LocalOfferCreated → RemoteAnswerApplied → Connected.
/// Callee path: Idle → RemoteOfferApplied → LocalAnswerCreated → Connected.
/// Both end in Closed.
#[derive(Debug, Clone, Serialize, Default)]
pub enum NegotiationState {
    /// No description exchanged yet.
    #[default]
    Idle,
    /// Caller: local offer applied and sent, waiting for the answer.
    LocalOfferCreated { offer_sent_at: DateTime<Utc> },
    /// Caller: remote answer applied, waiting for connectivity.
    RemoteAnswerApplied { answered_at: DateTime<Utc> },
    /// Callee: remote offer applied, local answer in progress.
    RemoteOfferApplied { received_at: DateTime<Utc> },
    /// Callee: local answer applied and sent, waiting for connectivity.
    LocalAnswerCreated { answered_at: DateTime<Utc> },
    /// Media connectivity established.
    Connected { connected_at: DateTime<Utc> },
    /// Session released.
    Closed {
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
}

/// State transitions for a peer session.
#[derive(Debug, Clone, Copy)]
pub enum NegotiationTransition {
    OfferSent,
    RemoteAnswerApplied,
    RemoteOfferApplied,
    AnswerSent,
    ConnectivityEstablished,
    Closed,
}

impl NegotiationState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// Whether a local offer was created and no answer has been applied yet.
    pub fn awaiting_remote_answer(&self) -> bool {
        matches!(self, Self::LocalOfferCreated { .. })
    }

    /// Whether a remote session description has been applied. Remote ICE
    /// candidates can only be added past this point; earlier arrivals are
    /// buffered by the peer session.
    pub fn has_remote_description(&self) -> bool {
        matches!(
            self,
            Self::RemoteOfferApplied { .. }
                | Self::RemoteAnswerApplied { .. }
                | Self::LocalAnswerCreated { .. }
                | Self::Connected { .. }
        )
    }

    /// Apply a state transition. Returns an error if the transition is not
    /// defined for the current state.
    pub fn apply_transition(
        &mut self,
        transition: NegotiationTransition,
    ) -> Result<(), InvalidTransition> {
        let new_state = match (&*self, transition) {
            (Self::Idle, NegotiationTransition::OfferSent) => Self::LocalOfferCreated {
                offer_sent_at: Utc::now(),
            },
            (Self::Idle, NegotiationTransition::RemoteOfferApplied) => Self::RemoteOfferApplied {
                received_at: Utc::now(),
            },
            (Self::LocalOfferCreated { .. }, NegotiationTransition::RemoteAnswerApplied) => {
                Self::RemoteAnswerApplied {
                    answered_at: Utc::now(),
                }
            }
            (Self::RemoteOfferApplied { .. }, NegotiationTransition::AnswerSent) => {
                Self::LocalAnswerCreated {
                    answered_at: Utc::now(),
                }
            }
            (
                Self::RemoteAnswerApplied { .. } | Self::LocalAnswerCreated { .. },
                NegotiationTransition::ConnectivityEstablished,
            ) => Self::Connected {
                connected_at: Utc::now(),
            },
            (Self::Connected { connected_at }, NegotiationTransition::Closed) => {
                let duration = Utc::now()
                    .signed_duration_since(*connected_at)
                    .num_seconds();
                Self::Closed {
                    ended_at: Utc::now(),
                    duration_secs: Some(duration),
                }
            }
            (current, NegotiationTransition::Closed) if !current.is_closed() => Self::Closed {
                ended_at: Utc::now(),
                duration_secs: None,
            },
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        *self = new_state;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// One active or pending call.
///
/// Owned exclusively by the call controller: created when the call starts,
/// dropped at teardown. At most one peer session exists per call session.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    /// Opaque room identifier for the signaling relay.
    pub chat_id: String,
    /// Auth credential for the signaling relay.
    #[serde(skip)]
    pub token: String,
    pub role: CallRole,
    pub media: LocalMediaState,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(
        chat_id: impl Into<String>,
        token: impl Into<String>,
        role: CallRole,
        video: bool,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            token: token.into(),
            role,
            media: LocalMediaState::new(video),
            created_at: Utc::now(),
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.role == CallRole::Caller
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Caller path: Idle → LocalOfferCreated → RemoteAnswerApplied →
    /// Connected → Closed, with a duration recorded.
    #[test]
    fn test_caller_flow() {
        let mut state = NegotiationState::default();
        assert!(state.is_idle());

        state
            .apply_transition(NegotiationTransition::OfferSent)
            .unwrap();
        assert!(state.awaiting_remote_answer());
        assert!(!state.has_remote_description());

        state
            .apply_transition(NegotiationTransition::RemoteAnswerApplied)
            .unwrap();
        assert!(state.has_remote_description());

        state
            .apply_transition(NegotiationTransition::ConnectivityEstablished)
            .unwrap();
        assert!(state.is_connected());

        state
            .apply_transition(NegotiationTransition::Closed)
            .unwrap();
        assert!(state.is_closed());
        if let NegotiationState::Closed { duration_secs, .. } = state {
            assert!(duration_secs.is_some());
        }
    }

    /// Callee path: Idle → RemoteOfferApplied → LocalAnswerCreated →
    /// Connected → Closed.
    #[test]
    fn test_callee_flow() {
        let mut state = NegotiationState::default();

        state
            .apply_transition(NegotiationTransition::RemoteOfferApplied)
            .unwrap();
        assert!(state.has_remote_description());

        state
            .apply_transition(NegotiationTransition::AnswerSent)
            .unwrap();
        state
            .apply_transition(NegotiationTransition::ConnectivityEstablished)
            .unwrap();
        assert!(state.is_connected());

        state
            .apply_transition(NegotiationTransition::Closed)
            .unwrap();
        assert!(state.is_closed());
    }

    /// Closing before connectivity leaves no duration.
    #[test]
    fn test_close_before_connected_has_no_duration() {
        let mut state = NegotiationState::default();
        state
            .apply_transition(NegotiationTransition::OfferSent)
            .unwrap();
        state
            .apply_transition(NegotiationTransition::Closed)
            .unwrap();
        if let NegotiationState::Closed { duration_secs, .. } = state {
            assert_eq!(duration_secs, None);
        } else {
            panic!("expected closed state");
        }
    }

    #[test]
    fn test_invalid_transitions() {
        let mut state = NegotiationState::default();

        // No answer can be applied before an offer exists, in either direction.
        assert!(
            state
                .apply_transition(NegotiationTransition::RemoteAnswerApplied)
                .is_err()
        );
        assert!(
            state
                .apply_transition(NegotiationTransition::AnswerSent)
                .is_err()
        );
        assert!(
            state
                .apply_transition(NegotiationTransition::ConnectivityEstablished)
                .is_err()
        );

        // A second offer is not allowed once one was sent.
        state
            .apply_transition(NegotiationTransition::OfferSent)
            .unwrap();
        assert!(
            state
                .apply_transition(NegotiationTransition::OfferSent)
                .is_err()
        );
        // Nor can a remote offer be applied after sending ours.
        assert!(
            state
                .apply_transition(NegotiationTransition::RemoteOfferApplied)
                .is_err()
        );
    }

    /// Closed is terminal: every transition, including another close, fails.
    #[test]
    fn test_closed_is_terminal() {
        let mut state = NegotiationState::default();
        state
            .apply_transition(NegotiationTransition::Closed)
            .unwrap();

        assert!(
            state
                .apply_transition(NegotiationTransition::OfferSent)
                .is_err()
        );
        assert!(
            state
                .apply_transition(NegotiationTransition::Closed)
                .is_err()
        );
        assert!(state.is_closed());
    }

    #[test]
    fn test_session_roles_and_media_flags() {
        let caller = CallSession::new("room-7", "tok", CallRole::Caller, true);
        assert!(caller.is_initiator());
        assert!(caller.media.audio_enabled);
        assert!(caller.media.video_enabled);

        let callee = CallSession::new("room-7", "tok", CallRole::Callee, false);
        assert!(!callee.is_initiator());
        assert!(!callee.media.video_enabled);
    }
}
