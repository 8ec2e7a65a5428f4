//! Outbound connector
//!
//! Opens the connection to the destination named in a session's request.
//! IP literals are dialed directly; domain names go through a shared
//! [`Resolver`] restricted to IPv4 results and the first result is dialed.

use crate::error::SessionError;
use crate::socks::types::TargetAddr;
use crate::transport::SocketOpts;
use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, error};

/// Asynchronous hostname to IPv4 resolution
///
/// One resolver is shared by every session in the process.
#[async_trait]
pub trait Resolver: Debug + Send + Sync {
    /// Resolve `host` to IPv4 socket addresses on `port`
    async fn resolve_ipv4(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddrV4>>;
}

/// Resolver backed by the runtime's `lookup_host`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioResolver;

#[async_trait]
impl Resolver for TokioResolver {
    async fn resolve_ipv4(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddrV4>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs
            .filter_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(_) => None,
            })
            .collect())
    }
}

/// Opens outbound links for sessions
#[async_trait]
pub trait Connector: Debug + Send + Sync + 'static {
    /// The connection type produced by this connector
    type Link: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `addr`
    ///
    /// On failure nothing is left allocated and the caller's state must not
    /// advance.
    async fn connect(&self, addr: &TargetAddr) -> Result<Self::Link, SessionError>;
}

/// TCP connector with optional resolve and connect timeouts
///
/// Without a configured timeout the operating system's defaults apply.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    resolver: Arc<dyn Resolver>,
    socket_opts: SocketOpts,
    connect_timeout: Option<Duration>,
    resolve_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Create a connector using the given shared resolver
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        TcpConnector {
            resolver,
            socket_opts: SocketOpts::for_outbound(),
            connect_timeout: None,
            resolve_timeout: None,
        }
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set resolution timeout
    pub fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, SessionError> {
        let lookup = self.resolver.resolve_ipv4(host, port);
        let result = match self.resolve_timeout {
            Some(limit) => tokio::time::timeout(limit, lookup)
                .await
                .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "resolve timeout"))),
            None => lookup.await,
        };

        let resolve_err = |source| SessionError::Resolve {
            host: host.to_string(),
            source,
        };
        let addrs = result.map_err(resolve_err)?;
        let first = addrs.first().copied().ok_or_else(|| {
            resolve_err(io::Error::new(
                io::ErrorKind::NotFound,
                "no IPv4 addresses found",
            ))
        })?;

        debug!("Resolved {} to {}", host, first);
        Ok(SocketAddr::V4(first))
    }

    async fn dial(&self, target: &TargetAddr, addr: SocketAddr) -> Result<TcpStream, SessionError> {
        let connect = TcpStream::connect(addr);
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))),
            None => connect.await,
        };

        let stream = result.map_err(|source| {
            error!("Failed to connect to {} ({}): {}", target, addr, source);
            SessionError::Connect {
                target: target.to_string(),
                source,
            }
        })?;

        if let Err(e) = self.socket_opts.apply(&stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }
        Ok(stream)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Link = TcpStream;

    async fn connect(&self, addr: &TargetAddr) -> Result<Self::Link, SessionError> {
        let socket_addr = match addr {
            TargetAddr::Ip(ip) => {
                debug!("Connecting to {} {}", addr.kind(), ip);
                *ip
            }
            TargetAddr::Domain(host, port) => {
                debug!("Connecting to domain {}:{}", host, port);
                self.resolve(host, *port).await?
            }
        };

        self.dial(addr, socket_addr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[derive(Debug, Default)]
    struct FixedResolver {
        answer: Vec<SocketAddrV4>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Resolver for FixedResolver {
        async fn resolve_ipv4(&self, _host: &str, port: u16) -> io::Result<Vec<SocketAddrV4>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .answer
                .iter()
                .map(|a| SocketAddrV4::new(*a.ip(), port))
                .collect())
        }
    }

    #[derive(Debug)]
    struct SlowResolver;

    #[async_trait]
    impl Resolver for SlowResolver {
        async fn resolve_ipv4(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddrV4>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_connect_ipv4_literal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();

        let resolver = Arc::new(FixedResolver::default());
        let connector = TcpConnector::new(resolver.clone());
        let target = TargetAddr::Ip(local);

        let (link, accepted) = tokio::join!(connector.connect(&target), listener.accept());
        assert!(link.is_ok());
        assert!(accepted.is_ok());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_domain_uses_resolver() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let resolver = Arc::new(FixedResolver {
            answer: vec![SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)],
            calls: AtomicUsize::new(0),
        });
        let connector = TcpConnector::new(resolver.clone());
        let target = TargetAddr::domain("service.internal", port);

        let (link, accepted) = tokio::join!(connector.connect(&target), listener.accept());
        assert!(link.is_ok());
        assert!(accepted.is_ok());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_domain_without_answers() {
        let connector = TcpConnector::new(Arc::new(FixedResolver::default()));
        let target = TargetAddr::domain("nowhere.invalid", 80);

        let err = connector.connect(&target).await.unwrap_err();
        assert!(matches!(err, SessionError::Resolve { .. }));
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[tokio::test]
    async fn test_resolve_timeout() {
        let connector = TcpConnector::new(Arc::new(SlowResolver))
            .with_resolve_timeout(Some(Duration::from_millis(20)));
        let target = TargetAddr::domain("slow.example", 80);

        match connector.connect(&target).await {
            Err(SessionError::Resolve { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::TimedOut)
            }
            other => panic!("Expected resolve timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        drop(listener);

        let connector = TcpConnector::new(Arc::new(TokioResolver))
            .with_connect_timeout(Some(Duration::from_secs(2)));
        let err = connector
            .connect(&TargetAddr::Ip(local))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_tokio_resolver_ipv4_only() {
        let addrs = TokioResolver.resolve_ipv4("127.0.0.1", 8080).await.unwrap();
        assert_eq!(addrs, vec![SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8080)]);

        let addrs = TokioResolver.resolve_ipv4("::1", 8080).await.unwrap();
        assert!(addrs.is_empty());
    }
}
