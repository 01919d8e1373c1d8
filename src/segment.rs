//! Captured TCP segment records and connection keys.
//!
//! The capture front-end (live device or [`pcap`](crate::pcap) file reader)
//! delivers segments as [`TcpSegment`] values; everything downstream keys on
//! the [`Endpoint`] pair.

use std::fmt;
use std::net::IpAddr;

use bytes::Bytes;

/// Microseconds per second; timestamps throughout the crate are microseconds
/// since the epoch.
pub const MICROS_PER_SEC: i64 = 1_000_000;

/// One side of a TCP conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            IpAddr::V4(addr) => write!(f, "{}:{}", addr, self.port),
            IpAddr::V6(addr) => write!(f, "[{}]:{}", addr, self.port),
        }
    }
}

/// TCP header flags carried on a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
}

impl TcpFlags {
    /// FIN and ACK set together, the close-handshake trigger.
    pub fn fin_ack(&self) -> bool {
        self.fin && self.ack
    }
}

/// Normalized connection key: the unordered endpoint pair, smaller endpoint
/// first for consistent lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowKey {
    a: Endpoint,
    b: Endpoint,
}

impl FlowKey {
    /// Create a normalized key. Two segments belong to the same connection
    /// iff their keys are equal, regardless of direction.
    pub fn new(x: Endpoint, y: Endpoint) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    /// The two endpoints in normalized order.
    pub fn endpoints(&self) -> (Endpoint, Endpoint) {
        (self.a, self.b)
    }

    pub fn contains(&self, endpoint: Endpoint) -> bool {
        self.a == endpoint || self.b == endpoint
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.a, self.b)
    }
}

/// A captured TCP segment, already sliced out of its link-layer frame.
///
/// The supplier of these records is not part of the core; see
/// [`pcap::SegmentReader`](crate::pcap::SegmentReader) for the capture-file
/// adapter.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    /// Capture timestamp, microseconds since the epoch.
    pub timestamp: i64,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub sequence: u32,
    pub acknowledgment: u32,
    pub flags: TcpFlags,
    /// Payload bytes, possibly empty.
    pub payload: Bytes,
}

impl TcpSegment {
    /// The normalized connection key for this segment.
    pub fn flow_key(&self) -> FlowKey {
        FlowKey::new(self.source, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ep(last: u8, port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), port)
    }

    #[test]
    fn test_flow_key_normalization() {
        let key1 = FlowKey::new(ep(1, 54321), ep(2, 80));
        let key2 = FlowKey::new(ep(2, 80), ep(1, 54321));
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_flow_key_distinguishes_ports() {
        let key1 = FlowKey::new(ep(1, 54321), ep(2, 80));
        let key2 = FlowKey::new(ep(1, 54322), ep(2, 80));
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_flow_key_contains() {
        let key = FlowKey::new(ep(1, 54321), ep(2, 80));
        assert!(key.contains(ep(1, 54321)));
        assert!(key.contains(ep(2, 80)));
        assert!(!key.contains(ep(1, 80)));
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(ep(1, 80).to_string(), "10.0.0.1:80");
        let v6 = Endpoint::new("::1".parse().unwrap(), 443);
        assert_eq!(v6.to_string(), "[::1]:443");
    }

    #[test]
    fn test_fin_ack() {
        let flags = TcpFlags {
            fin: true,
            ack: true,
            ..Default::default()
        };
        assert!(flags.fin_ack());
        assert!(!TcpFlags { fin: true, ..Default::default() }.fin_ack());
    }
}
