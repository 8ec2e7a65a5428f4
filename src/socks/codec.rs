//! SOCKS5 address codec
//!
//! Parses the variable-length destination address frame:
//!
//! ```text
//! +------+----------+----------+
//! | ATYP | DST.ADDR | DST.PORT |
//! +------+----------+----------+
//! |  1   | Variable |    2     |
//! +------+----------+----------+
//! ```
//!
//! Parsing works on a borrowed view of the inbound buffer and never
//! consumes anything itself. The caller commits the returned length only
//! after the whole frame has been accepted, so a short or malformed frame
//! leaves the buffer exactly as it was.

use super::consts::*;
use super::types::{AddressKind, TargetAddr};
use crate::error::{AddressError, Socks5Error};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Parse an address frame from the front of `input`
///
/// Returns the address and the number of bytes the frame occupies. At most
/// [`MAX_ADDRESS_FRAME_LEN`] bytes are ever examined.
pub fn parse_address(input: &[u8]) -> Result<(TargetAddr, usize), AddressError> {
    let tag = *input.first().ok_or(AddressError::Incomplete {
        needed: 1,
        available: 0,
    })?;
    let kind = AddressKind::from_byte(tag).ok_or(Socks5Error::AddressTypeNotSupported(tag))?;

    let needed = match kind {
        AddressKind::Ipv4 => IPV4_FRAME_LEN,
        AddressKind::Ipv6 => IPV6_FRAME_LEN,
        AddressKind::Domain => {
            let domain_len = *input.get(1).ok_or(AddressError::Incomplete {
                needed: 2,
                available: input.len(),
            })? as usize;
            if domain_len == 0 {
                return Err(Socks5Error::InvalidDomain("empty domain name".to_string()).into());
            }
            DOMAIN_FRAME_OVERHEAD + domain_len
        }
    };

    let frame = input.get(..needed).ok_or(AddressError::Incomplete {
        needed,
        available: input.len(),
    })?;
    let port = u16::from_be_bytes([frame[needed - 2], frame[needed - 1]]);

    let addr = match kind {
        AddressKind::Ipv4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&frame[1..5]);
            TargetAddr::ipv4(Ipv4Addr::from(octets), port)
        }
        AddressKind::Ipv6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&frame[1..17]);
            TargetAddr::ipv6(Ipv6Addr::from(octets), port)
        }
        AddressKind::Domain => {
            let name = &frame[2..needed - 2];
            let domain = std::str::from_utf8(name).map_err(|_| {
                Socks5Error::InvalidDomain(String::from_utf8_lossy(name).into_owned())
            })?;
            TargetAddr::domain(domain, port)
        }
    };

    Ok((addr, needed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain_frame(domain: &[u8], port: u16) -> Vec<u8> {
        let mut frame = vec![SOCKS5_ADDR_TYPE_DOMAIN, domain.len() as u8];
        frame.extend_from_slice(domain);
        frame.extend_from_slice(&port.to_be_bytes());
        frame
    }

    #[test]
    fn test_parse_ipv4() {
        let frame = [SOCKS5_ADDR_TYPE_IPV4, 1, 2, 3, 4, 0x00, 0x50];
        let (addr, consumed) = parse_address(&frame).unwrap();

        assert_eq!(consumed, 7);
        assert_eq!(addr, TargetAddr::ipv4(Ipv4Addr::new(1, 2, 3, 4), 80));
    }

    #[test]
    fn test_parse_ipv4_ignores_trailing_bytes() {
        let frame = [SOCKS5_ADDR_TYPE_IPV4, 10, 0, 0, 1, 0x1F, 0x90, 0xAA, 0xBB];
        let (addr, consumed) = parse_address(&frame).unwrap();

        assert_eq!(consumed, 7);
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_parse_ipv6() {
        let mut frame = vec![SOCKS5_ADDR_TYPE_IPV6];
        frame.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        frame.extend_from_slice(&443u16.to_be_bytes());

        let (addr, consumed) = parse_address(&frame).unwrap();
        assert_eq!(consumed, 19);
        assert_eq!(addr, TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 443));
    }

    #[test]
    fn test_parse_domain() {
        let frame = domain_frame(b"example.com", 443);
        let (addr, consumed) = parse_address(&frame).unwrap();

        assert_eq!(consumed, 4 + 11);
        assert_eq!(addr, TargetAddr::domain("example.com", 443));
    }

    #[test]
    fn test_parse_domain_max_length() {
        let name = vec![b'a'; MAX_DOMAIN_LEN];
        let frame = domain_frame(&name, 0xBEEF);
        assert_eq!(frame.len(), MAX_ADDRESS_FRAME_LEN);

        let (addr, consumed) = parse_address(&frame).unwrap();
        assert_eq!(consumed, MAX_ADDRESS_FRAME_LEN);
        match &addr {
            TargetAddr::Domain(domain, port) => {
                assert_eq!(domain.as_bytes(), name.as_slice());
                assert_eq!(*port, 0xBEEF);
            }
            other => panic!("Expected domain address, got {:?}", other),
        }
        assert_eq!(addr.encode(), frame);
    }

    #[test]
    fn test_parse_truncated_frames() {
        let ipv4 = [SOCKS5_ADDR_TYPE_IPV4, 1, 2, 3, 4, 0x00];
        assert_eq!(
            parse_address(&ipv4),
            Err(AddressError::Incomplete {
                needed: 7,
                available: 6
            })
        );

        let ipv6 = [SOCKS5_ADDR_TYPE_IPV6; 18];
        assert!(matches!(
            parse_address(&ipv6),
            Err(AddressError::Incomplete { needed: 19, .. })
        ));

        let domain = domain_frame(b"example.com", 80);
        assert_eq!(
            parse_address(&domain[..domain.len() - 1]),
            Err(AddressError::Incomplete {
                needed: 15,
                available: 14
            })
        );

        assert!(matches!(
            parse_address(&[SOCKS5_ADDR_TYPE_DOMAIN]),
            Err(AddressError::Incomplete { needed: 2, .. })
        ));
        assert!(matches!(
            parse_address(&[]),
            Err(AddressError::Incomplete { needed: 1, .. })
        ));
    }

    #[test]
    fn test_parse_unknown_kind() {
        let frame = [0x02, 1, 2, 3, 4, 0x00, 0x50];
        assert_eq!(
            parse_address(&frame),
            Err(AddressError::Invalid(Socks5Error::AddressTypeNotSupported(
                0x02
            )))
        );
    }

    #[test]
    fn test_parse_invalid_domain() {
        let frame = [SOCKS5_ADDR_TYPE_DOMAIN, 0, 0x00, 0x50];
        assert!(matches!(
            parse_address(&frame),
            Err(AddressError::Invalid(Socks5Error::InvalidDomain(_)))
        ));

        let frame = domain_frame(&[0xFF, 0xFE, 0xFD], 80);
        assert!(matches!(
            parse_address(&frame),
            Err(AddressError::Invalid(Socks5Error::InvalidDomain(_)))
        ));
    }
}
