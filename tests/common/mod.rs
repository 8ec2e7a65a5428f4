//! Test utilities and mocks for Socksmux
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use socksmux::mux::{MuxWrite, ReadGate, StreamId};
use socksmux::socks::Resolver;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Create a connected TCP stream pair for testing
pub async fn create_tcp_stream_pair() -> (TcpStream, TcpStream) {
    let (listener, addr) = create_test_listener().await;

    let (client_stream, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client_stream.unwrap(), accepted.unwrap().0)
}

/// Start a TCP echo server, returning its address
pub async fn start_echo_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut conn, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = conn.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

/// Negotiated-dialect greeting followed by a CONNECT request
pub fn negotiated_connect(addr_frame: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0x05, 0x01, 0x00, 0x05, 0x01, 0x00];
    bytes.extend_from_slice(addr_frame);
    bytes
}

/// Domain address frame
pub fn domain_frame(domain: &str, port: u16) -> Vec<u8> {
    let mut frame = vec![0x03, domain.len() as u8];
    frame.extend_from_slice(domain.as_bytes());
    frame.extend_from_slice(&port.to_be_bytes());
    frame
}

/// Resolver answering every lookup with fixed IPv4 addresses
#[derive(Debug, Default)]
pub struct StaticResolver {
    answer: Vec<SocketAddrV4>,
    lookups: Mutex<Vec<String>>,
}

impl StaticResolver {
    /// Resolve every name to `127.0.0.1`
    pub fn localhost() -> Self {
        StaticResolver {
            answer: vec![SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, 0)],
            lookups: Mutex::new(Vec::new()),
        }
    }

    /// Resolve nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Host names looked up so far
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve_ipv4(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddrV4>> {
        self.lookups.lock().unwrap().push(host.to_string());
        Ok(self
            .answer
            .iter()
            .map(|a| SocketAddrV4::new(*a.ip(), port))
            .collect())
    }
}

/// Multiplexer double with a shared window and call accounting
#[derive(Debug, Default)]
pub struct RecordingMux {
    window: AtomicUsize,
    calls: AtomicUsize,
    sent: Mutex<Vec<u8>>,
    gate: Mutex<Option<Arc<ReadGate>>>,
}

impl RecordingMux {
    /// Mux accepting `window` bytes before it needs credit
    pub fn with_window(window: usize) -> Arc<Self> {
        let mux = RecordingMux::default();
        mux.window.store(window, Ordering::SeqCst);
        Arc::new(mux)
    }

    /// Add window and deliver the drain signal
    pub fn drain(&self, credit: usize) {
        self.window.fetch_add(credit, Ordering::SeqCst);
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.resume();
        }
    }

    /// Number of `write` calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bytes accepted so far
    pub fn sent(&self) -> Vec<u8> {
        self.sent.lock().unwrap().clone()
    }
}

impl MuxWrite for RecordingMux {
    fn write(&self, _stream_id: StreamId, data: &[u8]) -> io::Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let accepted = data.len().min(self.window.load(Ordering::SeqCst));
        self.window.fetch_sub(accepted, Ordering::SeqCst);
        self.sent.lock().unwrap().extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn send_window(&self, _stream_id: StreamId) -> usize {
        self.window.load(Ordering::SeqCst)
    }

    fn register_drain(&self, _stream_id: StreamId, gate: Arc<ReadGate>) {
        *self.gate.lock().unwrap() = Some(gate);
    }
}
