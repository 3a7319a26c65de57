//! Publish session state machine
//!
//! One [`PublishState`] exists per broadcast. Only the session task writes it;
//! everyone else observes it through a `watch` channel.

use std::fmt;

/// Why a session ended in [`PublishState::Failed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Destination missing or not a usable URL
    NoDestination,
    /// TCP, handshake or `connect` failed
    ConnectFailure(String),
    /// Server refused `publish`
    PublishRejected(String),
    /// Connection broke after it was established
    Transport(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoDestination => write!(f, "no destination configured"),
            FailureReason::ConnectFailure(detail) => write!(f, "connect failed: {}", detail),
            FailureReason::PublishRejected(detail) => write!(f, "publish rejected: {}", detail),
            FailureReason::Transport(detail) => write!(f, "transport error: {}", detail),
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PublishState {
    /// Created, not started
    #[default]
    Idle,
    /// Connecting to the server and negotiating the stream
    Connecting,
    /// Media flows to the server
    Publishing,
    /// Stream stays open, media is dropped
    Paused,
    /// Tearing down
    Closing,
    Closed,
    Failed(FailureReason),
}

impl PublishState {
    /// True for `Closed` and `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, PublishState::Closed | PublishState::Failed(_))
    }

    pub fn is_publishing(&self) -> bool {
        matches!(self, PublishState::Publishing)
    }

    /// Connection established and stream open (publishing or paused)
    pub fn is_connected(&self) -> bool {
        matches!(self, PublishState::Publishing | PublishState::Paused)
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            PublishState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PublishState::Idle => "idle",
            PublishState::Connecting => "connecting",
            PublishState::Publishing => "publishing",
            PublishState::Paused => "paused",
            PublishState::Closing => "closing",
            PublishState::Closed => "closed",
            PublishState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishState::Failed(reason) => write!(f, "failed ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(PublishState::default(), PublishState::Idle);
    }

    #[test]
    fn test_terminal_states() {
        assert!(PublishState::Closed.is_terminal());
        assert!(PublishState::Failed(FailureReason::NoDestination).is_terminal());
        assert!(!PublishState::Closing.is_terminal());
        assert!(!PublishState::Paused.is_terminal());
    }

    #[test]
    fn test_connected_states() {
        assert!(PublishState::Publishing.is_connected());
        assert!(PublishState::Paused.is_connected());
        assert!(!PublishState::Connecting.is_connected());
        assert!(!PublishState::Closed.is_connected());
    }

    #[test]
    fn test_display() {
        assert_eq!(PublishState::Publishing.to_string(), "publishing");
        let failed = PublishState::Failed(FailureReason::PublishRejected("BadName".into()));
        assert_eq!(failed.to_string(), "failed (publish rejected: BadName)");
        assert_eq!(
            failed.failure(),
            Some(&FailureReason::PublishRejected("BadName".into()))
        );
    }
}
