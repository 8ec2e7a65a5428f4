//! Relay data path
//!
//! Once a session is connected, bytes flow in two directions:
//!
//! - **uplink**: outbound link -> tunnel. In multiplexed mode the bytes are
//!   offered to the [`MuxWrite`] primitive, which may accept only part of
//!   them; the remainder stays pending and the source stops being read until
//!   the multiplexer's drain signal resumes the [`ReadGate`]. In direct mode
//!   the bytes are written to the session's own tunnel connection.
//! - **downlink**: tunnel -> outbound link. Only used in direct mode; with
//!   multiplexing the multiplexer delivers stream data to the session itself.

use super::consts::DEFAULT_BUFFER_SIZE;
use crate::error::RelayError;
use crate::mux::{MuxWrite, ReadGate, StreamId};
use bytes::{Buf, BytesMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, trace};

/// Runtime switch between multiplexed and direct forwarding
///
/// Cloned handles share the same flag. It is read on every forwarding
/// decision, never cached.
#[derive(Debug, Clone, Default)]
pub struct RelayMode(Arc<AtomicBool>);

impl RelayMode {
    /// Create a mode handle
    pub fn new(multiplexed: bool) -> Self {
        RelayMode(Arc::new(AtomicBool::new(multiplexed)))
    }

    /// Whether forwarding currently goes through the multiplexer
    pub fn is_multiplexed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Switch forwarding mode
    pub fn set_multiplexed(&self, multiplexed: bool) {
        self.0.store(multiplexed, Ordering::SeqCst);
    }
}

/// Tunnel-facing writer for one session
///
/// Holds whichever tunnel handles the session has: the shared multiplexer,
/// the session's own direct connection, or both.
#[derive(Debug)]
pub struct Uplink<W> {
    stream_id: StreamId,
    mode: RelayMode,
    control: Option<Arc<dyn MuxWrite>>,
    direct: Option<W>,
    gate: Arc<ReadGate>,
    pending: BytesMut,
}

impl<W: AsyncWrite + Unpin> Uplink<W> {
    /// Uplink writing to the session's own tunnel connection
    pub fn direct(stream_id: StreamId, mode: RelayMode, writer: W) -> Self {
        Uplink {
            stream_id,
            mode,
            control: None,
            direct: Some(writer),
            gate: Arc::new(ReadGate::new()),
            pending: BytesMut::new(),
        }
    }

    /// Uplink writing through the multiplexer
    ///
    /// The uplink's gate is registered with the multiplexer so a drained
    /// stream resumes reading.
    pub fn multiplexed(stream_id: StreamId, mode: RelayMode, control: Arc<dyn MuxWrite>) -> Self {
        let gate = Arc::new(ReadGate::new());
        control.register_drain(stream_id, gate.clone());
        Uplink {
            stream_id,
            mode,
            control: Some(control),
            direct: None,
            gate,
            pending: BytesMut::new(),
        }
    }

    /// Attach a direct tunnel writer in addition to the multiplexer
    pub fn with_direct(mut self, writer: W) -> Self {
        self.direct = Some(writer);
        self
    }

    /// Stream id this uplink writes for
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Read readiness gate of the session's source
    pub fn gate(&self) -> &Arc<ReadGate> {
        &self.gate
    }

    /// Bytes refused by the multiplexer and not yet resent
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The direct tunnel writer, if any
    pub fn direct_link(&self) -> Option<&W> {
        self.direct.as_ref()
    }

    /// Forward one chunk towards the tunnel
    pub async fn forward(&mut self, data: &[u8]) -> Result<(), RelayError> {
        if self.mode.is_multiplexed() {
            self.pending.extend_from_slice(data);
            return self.flush_pending();
        }

        let writer = self.direct.as_mut().ok_or_else(|| {
            error!(
                "Stream {}: direct forwarding without a tunnel link",
                self.stream_id
            );
            RelayError::MissingDirectLink
        })?;
        writer.write_all(data).await?;
        writer.flush().await?;
        trace!("Stream {}: forwarded {} bytes directly", self.stream_id, data.len());
        Ok(())
    }

    /// Offer pending bytes to the multiplexer
    ///
    /// A partial acceptance disables the gate. The gate stays disabled until
    /// the multiplexer resumes it.
    pub fn flush_pending(&mut self) -> Result<(), RelayError> {
        let control = self.control.as_ref().ok_or_else(|| {
            error!(
                "Stream {}: multiplexing enabled without a control link",
                self.stream_id
            );
            RelayError::MissingControlLink
        })?;
        if self.pending.is_empty() {
            return Ok(());
        }

        let offered = self.pending.len();
        let accepted = control.write(self.stream_id, &self.pending)?.min(offered);
        self.pending.advance(accepted);
        trace!(
            "Stream {}: multiplexer accepted {}/{} bytes",
            self.stream_id,
            accepted,
            offered
        );

        if !self.pending.is_empty() && self.gate.disable() {
            debug!(
                "Stream {}: partial write {}/{}, pausing reads",
                self.stream_id, accepted, offered
            );
            // The window may have reopened before the gate closed
            if control.send_window(self.stream_id) > 0 {
                self.gate.resume();
            }
        }
        Ok(())
    }

    /// Pump `source` into the tunnel until EOF
    ///
    /// Returns the number of bytes read from the source.
    pub async fn run<R: AsyncRead + Unpin>(&mut self, mut source: R) -> Result<u64, RelayError> {
        let mut buf = BytesMut::with_capacity(DEFAULT_BUFFER_SIZE);
        let mut total = 0u64;

        loop {
            self.gate.wait_enabled().await;

            if !self.pending.is_empty() {
                self.flush_pending()?;
                continue;
            }

            buf.reserve(DEFAULT_BUFFER_SIZE);
            let n = source.read_buf(&mut buf).await?;
            if n == 0 {
                debug!("Stream {}: outbound link closed", self.stream_id);
                return Ok(total);
            }
            total += n as u64;

            let chunk = buf.split();
            self.forward(&chunk).await?;
        }
    }

    /// Close the direct tunnel writer, if any
    pub async fn shutdown(&mut self) -> Result<(), RelayError> {
        if let Some(writer) = self.direct.as_mut() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

/// Forward tunnel bytes into the outbound link
///
/// Reaching this while multiplexing is enabled is an internal inconsistency.
pub async fn forward_downlink<W: AsyncWrite + Unpin>(
    mode: &RelayMode,
    outbound: &mut W,
    data: &[u8],
) -> Result<(), RelayError> {
    if mode.is_multiplexed() {
        error!("Server-to-client relay reached while multiplexing is enabled");
        return Err(RelayError::UnexpectedDownlink);
    }
    outbound.write_all(data).await?;
    Ok(())
}

/// Pump the tunnel connection into the outbound link until EOF
pub async fn run_downlink<R, W>(mode: &RelayMode, mut tunnel: R, mut outbound: W) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = tunnel.read(&mut buf).await?;
        if n == 0 {
            outbound.shutdown().await?;
            return Ok(total);
        }
        forward_downlink(mode, &mut outbound, &buf[..n]).await?;
        total += n as u64;
    }
}
