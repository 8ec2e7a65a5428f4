//! Plain TCP dialer for connections to the remote server

use super::{ServerAddr, SocketOpts};
use crate::config::TcpConfig;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::net::TcpStream;

/// Default time allowed for reaching the server
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP dialer applying the configured socket options
#[derive(Debug, Clone)]
pub struct TcpTransport {
    socket_opts: SocketOpts,
    connect_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        TcpTransport {
            socket_opts: SocketOpts::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl TcpTransport {
    /// Create a dialer from the `[common.tcp]` section
    pub fn new(config: &TcpConfig) -> Self {
        TcpTransport {
            socket_opts: SocketOpts::from_tcp_config(config),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect to the server
    pub async fn connect(&self, addr: &ServerAddr) -> Result<TcpStream> {
        let resolved = addr.resolve().await?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(resolved))
            .await
            .with_context(|| format!("Connection timeout to {}", addr))?
            .with_context(|| format!("Failed to connect to {}", addr))?;

        if let Err(e) = self.socket_opts.apply(&stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }

        tracing::debug!("TCP connection established to {}", resolved);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_tcp_transport_from_config() {
        let config = TcpConfig {
            nodelay: false,
            keepalive_secs: 45,
            keepalive_interval: 9,
        };
        let transport = TcpTransport::new(&config);
        assert!(!transport.socket_opts.nodelay);
        assert_eq!(transport.socket_opts.keepalive_secs, Some(45));
        assert_eq!(transport.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_tcp_transport_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = ServerAddr::from(listener.local_addr().unwrap());

        let transport = TcpTransport::default();
        let (stream, accepted) = tokio::join!(transport.connect(&addr), listener.accept());
        assert!(stream.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_transport_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = ServerAddr::from(listener.local_addr().unwrap());
        drop(listener);

        let transport =
            TcpTransport::default().with_connect_timeout(Duration::from_millis(500));
        assert!(transport.connect(&addr).await.is_err());
    }
}
