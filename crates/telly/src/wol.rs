//! Wake-on-LAN magic packets.
//!
//! A magic packet is six `0xFF` bytes followed by the target's hardware address
//! repeated sixteen times, broadcast as a single UDP datagram. Nothing answers it.

use std::fmt;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::net::SocketAddrV4;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

/// Size of a magic packet in bytes.
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

/// Conventional discard port used for magic packets.
pub const WAKE_PORT: u16 = 9;

#[derive(Debug, thiserror::Error)]
pub enum WakeError {
    #[error("invalid hardware address {0:?}: expected 12 hex digits")]
    InvalidAddress(String),

    #[error("failed to send wake packet to {target}: {source}")]
    Network {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = WakeError;

    /// Accepts colon, hyphen, dot or space delimiters, or none at all.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WakeError::InvalidAddress(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| WakeError::InvalidAddress(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Build the 102-byte magic packet for `mac`.
pub fn magic_packet(mac: &MacAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac.0);
    }
    packet
}

/// Something that can wake a device by hardware address.
///
/// The orchestrator only talks to this trait so tests can count packets
/// without touching the network.
#[async_trait]
pub trait WakeSender: Send + Sync {
    async fn wake(&self, mac: &str) -> Result<(), WakeError>;
}

/// Broadcasts magic packets on the local network.
#[derive(Debug, Clone)]
pub struct LanWaker {
    target: SocketAddr,
}

impl LanWaker {
    pub fn new() -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, WAKE_PORT)),
        }
    }

    /// Send to a specific address instead of the limited broadcast address.
    pub fn with_target(target: SocketAddr) -> Self {
        Self { target }
    }
}

impl Default for LanWaker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WakeSender for LanWaker {
    async fn wake(&self, mac: &str) -> Result<(), WakeError> {
        // Parse before opening a socket so a bad address never causes I/O.
        let mac: MacAddress = mac.parse()?;
        let packet = magic_packet(&mac);

        let network = |source| WakeError::Network {
            target: self.target,
            source,
        };

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(network)?;
        socket.set_broadcast(true).map_err(network)?;
        socket.send_to(&packet, self.target).await.map_err(network)?;

        debug!(mac = %mac, target = %self.target, "sent wake packet");
        Ok(())
    }
}
