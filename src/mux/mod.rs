//! Stream multiplexing over a shared control connection
//!
//! Many sessions share one physical control connection. Each session's
//! bytes travel in frames tagged with its stream id, and each stream has its
//! own send window. The relay only needs the small [`MuxWrite`] contract
//! plus a [`ReadGate`] that the multiplexer reopens when a stalled stream's
//! window drains.

mod control;
mod frame;

pub use control::{MuxControl, MuxStream};
pub use frame::{
    read_frame, write_frame, Frame, FrameHeader, FrameType, FLAG_ACK, FLAG_FIN, FLAG_RST,
    FLAG_SYN, HEADER_LEN, INITIAL_WINDOW, PROTO_VERSION,
};

use std::fmt::Debug;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Identifier tagging a session's frames on the control connection
pub type StreamId = u32;

/// Multiplexed-write primitive
///
/// `write` may accept fewer bytes than offered when the stream's flow
/// control window is short. The caller keeps the rest and offers it again
/// after the gate registered with [`register_drain`](MuxWrite::register_drain)
/// is resumed. Writing to a stream that is closed, or whose control
/// connection is gone, is an error.
pub trait MuxWrite: Debug + Send + Sync {
    /// Offer `data` on `stream_id`; returns how many bytes were accepted
    fn write(&self, stream_id: StreamId, data: &[u8]) -> io::Result<usize>;

    /// Bytes the stream may currently send without blocking
    fn send_window(&self, stream_id: StreamId) -> usize;

    /// Register the gate to resume once `stream_id` can send again
    fn register_drain(&self, stream_id: StreamId, gate: Arc<ReadGate>);
}

/// Level-triggered read readiness switch for a relay source
///
/// Disabling and resuming are idempotent; only actual transitions are
/// counted and only a resume wakes waiters.
#[derive(Debug)]
pub struct ReadGate {
    enabled: AtomicBool,
    disables: AtomicUsize,
    notify: Notify,
}

impl Default for ReadGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadGate {
    /// Create an enabled gate
    pub fn new() -> Self {
        ReadGate {
            enabled: AtomicBool::new(true),
            disables: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    /// Whether the source may be read
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Stop reading the source; returns `true` if this call disabled it
    pub fn disable(&self) -> bool {
        let was_enabled = self.enabled.swap(false, Ordering::SeqCst);
        if was_enabled {
            self.disables.fetch_add(1, Ordering::SeqCst);
        }
        was_enabled
    }

    /// Drain signal: allow reading again and wake the waiting relay
    pub fn resume(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Number of enabled-to-disabled transitions so far
    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }

    /// Wait until the gate is enabled
    pub async fn wait_enabled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_enabled() {
                return;
            }
            notified.await;
        }
    }
}
