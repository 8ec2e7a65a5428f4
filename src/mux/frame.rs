//! Multiplexer frame codec
//!
//! Every frame starts with a fixed 12-byte header:
//!
//! ```text
//! +---------+------+-------+-----------+--------+
//! | VERSION | TYPE | FLAGS | STREAM ID | LENGTH |
//! +---------+------+-------+-----------+--------+
//! |    1    |  1   |   2   |     4     |   4    |
//! +---------+------+-------+-----------+--------+
//! ```
//!
//! All integers are big-endian. `LENGTH` is the payload size for data
//! frames, the window delta for window updates, the opaque value for pings
//! and the error code for go-away.

use super::StreamId;
use anyhow::{bail, Context, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame format version
pub const PROTO_VERSION: u8 = 0;

/// Size of the frame header
pub const HEADER_LEN: usize = 12;

/// Initial per-stream window in bytes
pub const INITIAL_WINDOW: u32 = 256 * 1024;

/// Open a stream
pub const FLAG_SYN: u16 = 0x1;
/// Acknowledge a stream open
pub const FLAG_ACK: u16 = 0x2;
/// Half-close a stream
pub const FLAG_FIN: u16 = 0x4;
/// Reset a stream
pub const FLAG_RST: u16 = 0x8;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Stream payload
    Data = 0x0,
    /// Send window increment
    WindowUpdate = 0x1,
    /// Keepalive / RTT probe
    Ping = 0x2,
    /// Session termination
    GoAway = 0x3,
}

impl FrameType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::WindowUpdate),
            0x2 => Some(FrameType::Ping),
            0x3 => Some(FrameType::GoAway),
            _ => None,
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame type
    pub frame_type: FrameType,
    /// Flag bits
    pub flags: u16,
    /// Stream the frame belongs to (0 for session-level frames)
    pub stream_id: StreamId,
    /// Type-dependent length field
    pub length: u32,
}

impl FrameHeader {
    /// Encode the header
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = PROTO_VERSION;
        buf[1] = self.frame_type as u8;
        buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
        buf[4..8].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode a header
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        if buf[0] != PROTO_VERSION {
            bail!("Unsupported mux frame version: {}", buf[0]);
        }
        let frame_type = FrameType::from_byte(buf[1])
            .with_context(|| format!("Unknown mux frame type: {}", buf[1]))?;

        Ok(FrameHeader {
            frame_type,
            flags: u16::from_be_bytes([buf[2], buf[3]]),
            stream_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Whether all bits of `flag` are set
    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag == flag
    }
}

/// A complete frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,
    /// Payload, only non-empty for data frames
    pub payload: Bytes,
}

impl Frame {
    /// Data frame carrying `payload`
    pub fn data(stream_id: StreamId, flags: u16, payload: Bytes) -> Self {
        Frame {
            header: FrameHeader {
                frame_type: FrameType::Data,
                flags,
                stream_id,
                length: payload.len() as u32,
            },
            payload,
        }
    }

    /// Window update granting `delta` more bytes
    pub fn window_update(stream_id: StreamId, flags: u16, delta: u32) -> Self {
        Self::control(FrameType::WindowUpdate, stream_id, flags, delta)
    }

    /// Ping carrying an opaque value
    pub fn ping(flags: u16, opaque: u32) -> Self {
        Self::control(FrameType::Ping, 0, flags, opaque)
    }

    /// Go-away with an error code
    pub fn go_away(code: u32) -> Self {
        Self::control(FrameType::GoAway, 0, 0, code)
    }

    fn control(frame_type: FrameType, stream_id: StreamId, flags: u16, length: u32) -> Self {
        Frame {
            header: FrameHeader {
                frame_type,
                flags,
                stream_id,
                length,
            },
            payload: Bytes::new(),
        }
    }
}

/// Read one frame from the control connection
pub async fn read_frame<T: AsyncRead + Unpin>(conn: &mut T) -> Result<Frame> {
    let mut buf = [0u8; HEADER_LEN];
    conn.read_exact(&mut buf)
        .await
        .with_context(|| "Failed to read mux frame header")?;
    let header = FrameHeader::decode(&buf)?;

    if header.frame_type != FrameType::Data {
        return Ok(Frame {
            header,
            payload: Bytes::new(),
        });
    }

    if header.length > INITIAL_WINDOW {
        bail!(
            "Mux data frame of {} bytes exceeds the stream window",
            header.length
        );
    }

    let mut payload = BytesMut::zeroed(header.length as usize);
    conn.read_exact(&mut payload)
        .await
        .with_context(|| "Failed to read mux frame payload")?;

    Ok(Frame {
        header,
        payload: payload.freeze(),
    })
}

/// Write one frame to the control connection
pub async fn write_frame<T: AsyncWrite + Unpin>(conn: &mut T, frame: &Frame) -> Result<()> {
    conn.write_all(&frame.header.encode())
        .await
        .with_context(|| "Failed to write mux frame header")?;
    if !frame.payload.is_empty() {
        conn.write_all(&frame.payload)
            .await
            .with_context(|| "Failed to write mux frame payload")?;
    }
    conn.flush().await.with_context(|| "Failed to flush mux frame")?;
    Ok(())
}
