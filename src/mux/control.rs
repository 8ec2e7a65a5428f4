//! Stream table of a multiplexed control connection
//!
//! [`MuxControl`] is shared by every session on one control connection. It
//! turns inbound frames into per-stream deliveries and queues outbound
//! frames for the connection writer. Each stream has a send window that
//! limits how much [`MuxWrite::write`] accepts; window updates from the peer
//! reopen it and resume the stream's [`ReadGate`]. The receive side is
//! bounded the same way: a peer sending past the window it was granted gets
//! the stream reset.
//!
//! When the control connection ends, [`MuxControl::shutdown`] empties the
//! table so every session sees its stream close.

use super::frame::{Frame, FrameType, FLAG_ACK, FLAG_FIN, FLAG_RST, FLAG_SYN, INITIAL_WINDOW};
use super::{MuxWrite, ReadGate, StreamId};
use crate::error::SocksmuxError;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct StreamSlot {
    send_window: u32,
    recv_window: u32,
    inbound: mpsc::UnboundedSender<Bytes>,
    gate: Option<Arc<ReadGate>>,
}

/// Shared state of one multiplexed control connection
#[derive(Debug)]
pub struct MuxControl {
    outbound: mpsc::UnboundedSender<Frame>,
    streams: Mutex<HashMap<StreamId, StreamSlot>>,
}

/// Receiving end of one multiplexed stream
///
/// Dropping it closes the stream and sends FIN to the peer.
#[derive(Debug)]
pub struct MuxStream {
    id: StreamId,
    control: Arc<MuxControl>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
}

impl MuxStream {
    /// Stream id
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Control connection the stream belongs to
    pub fn control(&self) -> Arc<MuxControl> {
        self.control.clone()
    }

    /// Next chunk from the peer, or `None` once the stream is closed
    ///
    /// Receiving a chunk returns its size to the peer as window credit.
    pub async fn recv(&mut self) -> Option<Bytes> {
        let data = self.inbound.recv().await?;
        self.control.grant(self.id, data.len());
        Some(data)
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        self.control.close_stream(self.id);
    }
}

impl MuxControl {
    /// Create the stream table and the queue of frames to send
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = MuxControl {
            outbound: tx,
            streams: Mutex::new(HashMap::new()),
        };
        (Arc::new(control), rx)
    }

    /// Number of open streams
    pub fn stream_count(&self) -> usize {
        self.lock().len()
    }

    /// Process one frame from the peer
    ///
    /// Returns the new stream when the frame opens one. A go-away from the
    /// peer ends the connection.
    pub fn handle_frame(self: &Arc<Self>, frame: Frame) -> Result<Option<MuxStream>, SocksmuxError> {
        let header = frame.header;
        trace!("Mux frame in: {:?}", header);

        match header.frame_type {
            FrameType::GoAway => {
                return Err(SocksmuxError::Mux(format!(
                    "peer sent go-away with code {}",
                    header.length
                )))
            }
            FrameType::Ping => {
                if header.has_flag(FLAG_SYN) {
                    self.send(Frame::ping(FLAG_ACK, header.length));
                }
                return Ok(None);
            }
            FrameType::Data | FrameType::WindowUpdate => {}
        }

        let id = header.stream_id;
        let opened = if header.has_flag(FLAG_SYN) {
            self.open_stream(id)?
        } else {
            None
        };

        match header.frame_type {
            FrameType::WindowUpdate => self.credit(id, header.length),
            FrameType::Data if !frame.payload.is_empty() => self.deliver(id, frame.payload),
            _ => {}
        }

        if header.has_flag(FLAG_FIN) || header.has_flag(FLAG_RST) {
            debug!("Stream {}: closed by peer", id);
            self.lock().remove(&id);
        }

        Ok(opened)
    }

    /// Remove a stream and tell the peer
    pub fn close_stream(&self, id: StreamId) {
        if self.lock().remove(&id).is_some() {
            debug!("Stream {}: closing", id);
            self.send(Frame::window_update(id, FLAG_FIN, 0));
        }
    }

    /// Close every stream after the control connection ended
    ///
    /// Pending `recv` calls return `None`, later writes fail and stalled
    /// uplinks are woken so they observe the failure.
    pub fn shutdown(&self) {
        let slots: Vec<StreamSlot> = self.lock().drain().map(|(_, slot)| slot).collect();
        if !slots.is_empty() {
            debug!("Closing {} streams of a dead control connection", slots.len());
        }
        for slot in slots {
            if let Some(gate) = slot.gate {
                gate.resume();
            }
        }
    }

    fn open_stream(self: &Arc<Self>, id: StreamId) -> Result<Option<MuxStream>, SocksmuxError> {
        let mut streams = self.lock();
        if streams.contains_key(&id) {
            return Err(SocksmuxError::Mux(format!("duplicate SYN for stream {}", id)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        streams.insert(
            id,
            StreamSlot {
                send_window: INITIAL_WINDOW,
                recv_window: INITIAL_WINDOW,
                inbound: tx,
                gate: None,
            },
        );
        drop(streams);

        self.send(Frame::window_update(id, FLAG_ACK, 0));
        debug!("Stream {}: opened", id);
        Ok(Some(MuxStream {
            id,
            control: self.clone(),
            inbound: rx,
        }))
    }

    fn credit(&self, id: StreamId, delta: u32) {
        let mut streams = self.lock();
        let Some(slot) = streams.get_mut(&id) else {
            return;
        };
        slot.send_window = slot.send_window.saturating_add(delta);
        if slot.send_window > 0 {
            if let Some(gate) = &slot.gate {
                gate.resume();
            }
        }
    }

    fn deliver(&self, id: StreamId, payload: Bytes) {
        let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        let mut streams = self.lock();
        let reason = match streams.get_mut(&id) {
            None => "data for unknown stream",
            Some(slot) if len > slot.recv_window => "receive window exceeded",
            Some(slot) => {
                slot.recv_window -= len;
                if slot.inbound.send(payload).is_ok() {
                    return;
                }
                "session gone"
            }
        };
        streams.remove(&id);
        drop(streams);

        warn!("Stream {}: {}, resetting", id, reason);
        self.send(Frame::window_update(id, FLAG_RST, 0));
    }

    fn grant(&self, id: StreamId, consumed: usize) {
        if consumed == 0 {
            return;
        }
        let delta = u32::try_from(consumed).unwrap_or(u32::MAX);
        let mut streams = self.lock();
        if let Some(slot) = streams.get_mut(&id) {
            slot.recv_window = slot.recv_window.saturating_add(delta);
            self.send(Frame::window_update(id, 0, delta));
        }
    }

    fn send(&self, frame: Frame) -> bool {
        self.outbound.send(frame).is_ok()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StreamId, StreamSlot>> {
        self.streams.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MuxWrite for MuxControl {
    fn write(&self, stream_id: StreamId, data: &[u8]) -> io::Result<usize> {
        let mut streams = self.lock();
        let Some(slot) = streams.get_mut(&stream_id) else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("stream {} is closed", stream_id),
            ));
        };

        let accepted = data.len().min(slot.send_window as usize);
        if accepted == 0 {
            return Ok(0);
        }

        let frame = Frame::data(stream_id, 0, Bytes::copy_from_slice(&data[..accepted]));
        if !self.send(frame) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "control connection closed",
            ));
        }
        slot.send_window -= accepted as u32;
        Ok(accepted)
    }

    fn send_window(&self, stream_id: StreamId) -> usize {
        self.lock()
            .get(&stream_id)
            .map_or(0, |slot| slot.send_window as usize)
    }

    fn register_drain(&self, stream_id: StreamId, gate: Arc<ReadGate>) {
        if let Some(slot) = self.lock().get_mut(&stream_id) {
            slot.gate = Some(gate);
        }
    }
}
