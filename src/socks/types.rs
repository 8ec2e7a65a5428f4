//! SOCKS5 type definitions
//!
//! Defines the destination address value type carried by the request frame.

use super::consts::*;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Kind tag of an address frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// 4-byte IPv4 address
    Ipv4,
    /// 16-byte IPv6 address
    Ipv6,
    /// Length-prefixed domain name
    Domain,
}

impl AddressKind {
    /// Parse a kind tag byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_ADDR_TYPE_IPV4 => Some(AddressKind::Ipv4),
            SOCKS5_ADDR_TYPE_IPV6 => Some(AddressKind::Ipv6),
            SOCKS5_ADDR_TYPE_DOMAIN => Some(AddressKind::Domain),
            _ => None,
        }
    }

    /// Convert to the kind tag byte
    pub fn to_byte(self) -> u8 {
        match self {
            AddressKind::Ipv4 => SOCKS5_ADDR_TYPE_IPV4,
            AddressKind::Ipv6 => SOCKS5_ADDR_TYPE_IPV6,
            AddressKind::Domain => SOCKS5_ADDR_TYPE_DOMAIN,
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressKind::Ipv4 => write!(f, "IPv4"),
            AddressKind::Ipv6 => write!(f, "IPv6"),
            AddressKind::Domain => write!(f, "domain"),
        }
    }
}

/// Target address for SOCKS5 requests
///
/// Represents the destination address in a SOCKS5 request.
/// Can be an IP address (v4 or v6) or a domain name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl TargetAddr {
    /// Create a new TargetAddr from an IPv4 address and port
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create a new TargetAddr from an IPv6 address and port
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create a new TargetAddr from a domain name and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        TargetAddr::Domain(domain.into(), port)
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Get the address kind
    pub fn kind(&self) -> AddressKind {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => AddressKind::Ipv4,
            TargetAddr::Ip(SocketAddr::V6(_)) => AddressKind::Ipv6,
            TargetAddr::Domain(_, _) => AddressKind::Domain,
        }
    }

    /// Length of this address once encoded as a frame
    pub fn encoded_len(&self) -> usize {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => IPV4_FRAME_LEN,
            TargetAddr::Ip(SocketAddr::V6(_)) => IPV6_FRAME_LEN,
            TargetAddr::Domain(domain, _) => DOMAIN_FRAME_OVERHEAD + domain.len(),
        }
    }

    /// Serialize the address to its wire frame
    ///
    /// Domains longer than 255 bytes cannot be represented and are
    /// truncated to the first 255 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());

        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                bytes.push(SOCKS5_ADDR_TYPE_IPV4);
                bytes.extend_from_slice(&addr.ip().octets());
                bytes.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                bytes.push(SOCKS5_ADDR_TYPE_IPV6);
                bytes.extend_from_slice(&addr.ip().octets());
                bytes.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Domain(domain, port) => {
                let name = &domain.as_bytes()[..domain.len().min(MAX_DOMAIN_LEN)];
                bytes.push(SOCKS5_ADDR_TYPE_DOMAIN);
                bytes.push(name.len() as u8);
                bytes.extend_from_slice(name);
                bytes.extend_from_slice(&port.to_be_bytes());
            }
        }

        bytes
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_kind_from_byte() {
        assert_eq!(AddressKind::from_byte(1), Some(AddressKind::Ipv4));
        assert_eq!(AddressKind::from_byte(3), Some(AddressKind::Domain));
        assert_eq!(AddressKind::from_byte(4), Some(AddressKind::Ipv6));
        assert_eq!(AddressKind::from_byte(2), None);
        assert_eq!(AddressKind::from_byte(0xFF), None);
    }

    #[test]
    fn test_target_addr_ipv4() {
        let addr = TargetAddr::ipv4(Ipv4Addr::new(192, 168, 1, 1), 8080);
        assert_eq!(addr.port(), 8080);
        assert_eq!(addr.kind(), AddressKind::Ipv4);
        assert_eq!(addr.encoded_len(), 7);
    }

    #[test]
    fn test_target_addr_ipv6() {
        let addr = TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 443);
        assert_eq!(addr.port(), 443);
        assert_eq!(addr.kind(), AddressKind::Ipv6);
        assert_eq!(addr.encoded_len(), 19);
    }

    #[test]
    fn test_target_addr_domain() {
        let addr = TargetAddr::domain("example.com", 80);
        assert_eq!(addr.port(), 80);
        assert_eq!(addr.kind(), AddressKind::Domain);
        assert_eq!(addr.encoded_len(), 15);
    }

    #[test]
    fn test_target_addr_display() {
        let addr = TargetAddr::ipv4(Ipv4Addr::new(127, 0, 0, 1), 8080);
        assert_eq!(format!("{}", addr), "127.0.0.1:8080");

        let addr = TargetAddr::domain("test.com", 443);
        assert_eq!(format!("{}", addr), "test.com:443");
    }

    #[test]
    fn test_target_addr_encode_ipv4() {
        let addr = TargetAddr::ipv4(Ipv4Addr::new(192, 168, 1, 1), 8080);
        let bytes = addr.encode();

        assert_eq!(bytes[0], SOCKS5_ADDR_TYPE_IPV4);
        assert_eq!(&bytes[1..5], &[192, 168, 1, 1]);
        assert_eq!(&bytes[5..7], &8080u16.to_be_bytes());
    }

    #[test]
    fn test_target_addr_encode_domain() {
        let addr = TargetAddr::domain("test", 80);
        let bytes = addr.encode();

        assert_eq!(bytes[0], SOCKS5_ADDR_TYPE_DOMAIN);
        assert_eq!(bytes[1], 4);
        assert_eq!(&bytes[2..6], b"test");
        assert_eq!(&bytes[6..8], &80u16.to_be_bytes());
    }

    #[test]
    fn test_target_addr_from_socket_addr() {
        let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1234);
        let target: TargetAddr = socket_addr.into();
        assert_eq!(target, TargetAddr::Ip(socket_addr));
    }
}
