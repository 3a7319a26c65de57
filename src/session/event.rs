//! Connection events raised by a transport

use std::fmt;

use super::state::FailureReason;

/// Classes of transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ConnectFailure,
    PublishRejected,
    TransportError,
}

/// Asynchronous notification from the transport layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Informational status, e.g. `NetStream.Publish.Start`
    Status { code: String, detail: String },
    /// The connection can no longer be used
    Error { code: ErrorCode, detail: String },
}

impl ConnectionEvent {
    pub fn status(code: impl Into<String>, detail: impl Into<String>) -> Self {
        ConnectionEvent::Status {
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn error(code: ErrorCode, detail: impl Into<String>) -> Self {
        ConnectionEvent::Error {
            code,
            detail: detail.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionEvent::Error { .. })
    }

    /// Failure the session should end with, if any
    pub fn failure(&self) -> Option<FailureReason> {
        match self {
            ConnectionEvent::Status { .. } => None,
            ConnectionEvent::Error { code, detail } => Some(match code {
                ErrorCode::ConnectFailure => FailureReason::ConnectFailure(detail.clone()),
                ErrorCode::PublishRejected => FailureReason::PublishRejected(detail.clone()),
                ErrorCode::TransportError => FailureReason::Transport(detail.clone()),
            }),
        }
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Status { code, detail } => write!(f, "{} {}", code, detail),
            ConnectionEvent::Error { code, detail } => write!(f, "{:?}: {}", code, detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_not_a_failure() {
        let event = ConnectionEvent::status("NetStream.Publish.Start", "started");
        assert!(!event.is_error());
        assert_eq!(event.failure(), None);
    }

    #[test]
    fn test_error_maps_to_failure_reason() {
        let cases = [
            (ErrorCode::ConnectFailure, FailureReason::ConnectFailure("x".into())),
            (ErrorCode::PublishRejected, FailureReason::PublishRejected("x".into())),
            (ErrorCode::TransportError, FailureReason::Transport("x".into())),
        ];
        for (code, expected) in cases {
            assert_eq!(ConnectionEvent::error(code, "x").failure(), Some(expected));
        }
    }
}
