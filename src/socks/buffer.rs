//! Per-session inbound byte queue
//!
//! Holds the bytes that arrived on a session's logical channel and have not
//! yet been consumed by the protocol layer.

use crate::error::SessionError;
use bytes::{Bytes, BytesMut};

/// Ordered byte queue with peek/commit semantics
///
/// Readers look at buffered bytes with [`peek`](InboundBuffer::peek) and
/// remove them with [`commit`](InboundBuffer::commit) once a unit of
/// protocol input has been fully accepted.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    buf: BytesMut,
}

impl InboundBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        InboundBuffer {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append bytes received from the channel
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Borrow the first `n` bytes, or `None` if fewer are buffered
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        self.buf.get(..n)
    }

    /// Borrow everything currently buffered
    pub fn peek_all(&self) -> &[u8] {
        &self.buf
    }

    /// Remove the first `n` bytes
    ///
    /// Committing more than is buffered means the caller's accounting is
    /// corrupt; that is reported as a desync and nothing is removed.
    pub fn commit(&mut self, n: usize) -> Result<(), SessionError> {
        if n > self.buf.len() {
            return Err(SessionError::Desync {
                requested: n,
                available: self.buf.len(),
            });
        }
        let _ = self.buf.split_to(n);
        Ok(())
    }

    /// Remove and return everything buffered without copying
    pub fn take_all(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Mutable access for reading straight from a socket
    pub fn as_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}
