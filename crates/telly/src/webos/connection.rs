//! Connection states and transport endpoints.

use std::fmt;

/// State of the client's single logical connection.
///
/// `Disconnected -> Connecting -> Connected`, then back to `Disconnected` on
/// disconnect or a clean close, or to `Error` when the receive path fails while
/// connected. Pairing happens inside `Connecting`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True while a connection is live or being set up.
    pub fn is_busy(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Error(cause) => write!(f, "error: {}", cause),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// TLS WebSocket
    Secure,
    /// Plain WebSocket
    Plain,
}

impl TransportKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            TransportKind::Secure => "wss",
            TransportKind::Plain => "ws",
        }
    }
}

/// One place the client can try to reach the TV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub kind: TransportKind,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(kind: TransportKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", self.kind.scheme(), self.host, self.port)
        } else {
            format!("{}://{}:{}", self.kind.scheme(), self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let secure = Endpoint::new(TransportKind::Secure, "192.168.1.40", 3001);
        let plain = Endpoint::new(TransportKind::Plain, "192.168.1.40", 3000);
        assert_eq!(secure.url(), "wss://192.168.1.40:3001");
        assert_eq!(plain.to_string(), "ws://192.168.1.40:3000");
    }

    #[test]
    fn test_busy_states() {
        assert!(ConnectionState::Connecting.is_busy());
        assert!(ConnectionState::Connected.is_busy());
        assert!(!ConnectionState::Disconnected.is_busy());
        assert!(!ConnectionState::Error("reset".into()).is_busy());
    }
}
