use std::time::Duration;

use super::connection::Endpoint;

/// Errors surfaced by the protocol client.
///
/// Only transport failures during connect are retried (secure, then plain);
/// everything else goes straight back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Socket, TLS or WebSocket level failure.
    #[error("transport failure on {endpoint}: {reason}")]
    TransportFailure { endpoint: String, reason: String },

    /// The TV accepted the socket but never acknowledged registration.
    #[error("registration with {endpoint} timed out after {elapsed:?}")]
    HandshakeTimeout { endpoint: String, elapsed: Duration },

    /// A command was sent without a live, registered session.
    #[error("not connected")]
    NotConnected,

    /// A pending request was invalidated because the connection went away.
    #[error("connection closed")]
    ConnectionClosed,

    /// The TV answered with an error envelope.
    #[error("{uri} failed: {message}")]
    CommandFailed { uri: String, message: String },
}

impl ClientError {
    pub fn transport(endpoint: &Endpoint, reason: impl ToString) -> Self {
        ClientError::TransportFailure {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether a failed connect attempt may move on to the next transport.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            ClientError::TransportFailure { .. } | ClientError::HandshakeTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webos::TransportKind;

    #[test]
    fn test_transport_error_names_endpoint() {
        let endpoint = Endpoint::new(TransportKind::Plain, "10.0.0.2", 3000);
        let err = ClientError::transport(&endpoint, "connection refused");
        assert_eq!(
            err.to_string(),
            "transport failure on ws://10.0.0.2:3000: connection refused"
        );
    }

    #[test]
    fn test_only_transport_errors_fall_back() {
        let endpoint = Endpoint::new(TransportKind::Secure, "10.0.0.2", 3001);
        assert!(ClientError::transport(&endpoint, "refused").allows_fallback());
        assert!(ClientError::HandshakeTimeout {
            endpoint: endpoint.to_string(),
            elapsed: Duration::from_secs(10),
        }
        .allows_fallback());
        assert!(!ClientError::CommandFailed {
            uri: "register".into(),
            message: "403 User rejected pairing".into(),
        }
        .allows_fallback());
        assert!(!ClientError::ConnectionClosed.allows_fallback());
    }

    #[test]
    fn test_command_failed_display() {
        let err = ClientError::CommandFailed {
            uri: "ssap://tv/switchInput".into(),
            message: "404 no such input".into(),
        };
        assert_eq!(err.to_string(), "ssap://tv/switchInput failed: 404 no such input");
    }
}
