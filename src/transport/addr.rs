//! Remote server address with cached resolution
//!
//! The control connection and every redirect worker dial the same server
//! host repeatedly, so the first successful lookup is kept.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// `host:port` of the remote server, resolved once on first use
#[derive(Debug, Clone)]
pub struct ServerAddr {
    host: String,
    port: u16,
    cached: Arc<RwLock<Option<SocketAddr>>>,
}

impl ServerAddr {
    /// Create an unresolved address
    pub fn new(host: &str, port: u16) -> Self {
        ServerAddr {
            host: host.to_string(),
            port,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Resolve the address, using the cached result if there is one
    pub async fn resolve(&self) -> Result<SocketAddr> {
        if let Some(cached) = *self.cached.read().await {
            return Ok(cached);
        }

        let resolved = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("Failed to resolve address: {}", self))?
            .next()
            .with_context(|| format!("No addresses found for: {}", self))?;

        *self.cached.write().await = Some(resolved);
        Ok(resolved)
    }
}

impl std::fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for ServerAddr {
    fn from(addr: SocketAddr) -> Self {
        ServerAddr {
            host: addr.ip().to_string(),
            port: addr.port(),
            cached: Arc::new(RwLock::new(Some(addr))),
        }
    }
}
