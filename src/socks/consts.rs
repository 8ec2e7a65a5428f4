//! SOCKS5 protocol constants
//!
//! Defines the constants used by the negotiation and address wire formats.

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;

// Commands
/// TCP CONNECT command
pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;

// Address types
/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Greeting the negotiated dialect accepts: one method, no-auth
pub const SOCKS5_GREETING: [u8; 3] = [SOCKS5_VERSION, 0x01, SOCKS5_AUTH_METHOD_NONE];

/// Reply to [`SOCKS5_GREETING`]
pub const SOCKS5_GREETING_REPLY: [u8; 3] = [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE, 0x00];

/// Request header the negotiated dialect accepts: CONNECT
pub const SOCKS5_CONNECT_HEADER: [u8; 3] =
    [SOCKS5_VERSION, SOCKS5_CMD_TCP_CONNECT, SOCKS5_RESERVED];

// Frame sizes
/// Maximum domain name length
pub const MAX_DOMAIN_LEN: usize = 255;
/// Address frame size for IPv4: kind + 4 + port
pub const IPV4_FRAME_LEN: usize = 7;
/// Address frame size for IPv6: kind + 16 + port
pub const IPV6_FRAME_LEN: usize = 19;
/// Address frame overhead for a domain: kind + length + port
pub const DOMAIN_FRAME_OVERHEAD: usize = 4;
/// Largest possible address frame (a 255-byte domain)
pub const MAX_ADDRESS_FRAME_LEN: usize = DOMAIN_FRAME_OVERHEAD + MAX_DOMAIN_LEN;

/// Minimum bytes buffered before the negotiated request is attempted
pub const MIN_REQUEST_LEN: usize = SOCKS5_CONNECT_HEADER.len() + IPV4_FRAME_LEN;

/// Default scratch size for relay reads
pub const DEFAULT_BUFFER_SIZE: usize = 8192;
