//! Client configuration types
//!
//! Defines the `[common]` section and the `[[proxies]]` list.

use super::TcpConfig;
use crate::error::SocksmuxError;
use crate::socks::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default control connection port
fn default_server_port() -> u16 {
    7000
}

/// Default forwarding mode
fn default_tcp_mux() -> bool {
    true
}

/// Default listen address for local listeners
fn default_local_ip() -> String {
    "0.0.0.0".to_string()
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Settings shared by every proxy
    pub common: CommonConfig,

    /// Proxy services
    #[serde(default)]
    pub proxies: Vec<ProxyServiceConfig>,
}

/// `[common]` section
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommonConfig {
    /// Remote server host
    pub server_addr: String,

    /// Control connection port on the server
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Multiplex sessions over the control connection
    #[serde(default = "default_tcp_mux")]
    pub tcp_mux: bool,

    /// Outbound connect timeout in seconds; unset leaves the OS default
    #[serde(default)]
    pub connect_timeout: Option<u64>,

    /// Name resolution timeout in seconds; unset leaves the resolver default
    #[serde(default)]
    pub resolve_timeout: Option<u64>,

    /// Socket tuning
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl CommonConfig {
    /// Outbound connect timeout
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }

    /// Name resolution timeout
    pub fn resolve_timeout(&self) -> Option<Duration> {
        self.resolve_timeout.map(Duration::from_secs)
    }
}

/// Kind of proxy service
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    /// SOCKS5 sessions relayed to their requested destinations
    #[serde(rename = "socks5")]
    Socks5,
    /// Plain TCP redirect from a local port to a server port
    #[serde(rename = "tcp_redir")]
    TcpRedir,
}

/// One `[[proxies]]` entry
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyServiceConfig {
    /// Unique proxy name
    pub name: String,

    /// Service kind
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,

    /// Local listen address
    #[serde(default = "default_local_ip")]
    pub local_ip: String,

    /// Local listen port, used by `tcp_redir` proxies
    #[serde(default)]
    pub local_port: u16,

    /// Server port: redirect target, or where direct-mode SOCKS5 tunnel
    /// connections are dialed
    pub remote_port: u16,

    /// SOCKS5 negotiation dialect
    #[serde(default)]
    pub dialect: Dialect,
}

fn invalid(msg: impl Into<String>) -> SocksmuxError {
    SocksmuxError::Config(msg.into())
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SocksmuxError> {
        if self.common.server_addr.is_empty() {
            return Err(invalid("server_addr must not be empty"));
        }
        if self.common.server_port == 0 {
            return Err(invalid("server_port must not be 0"));
        }
        if self.common.connect_timeout == Some(0) {
            return Err(invalid("connect_timeout must be greater than 0"));
        }

        let mut names = HashSet::new();
        for proxy in &self.proxies {
            if !names.insert(proxy.name.as_str()) {
                return Err(invalid(format!("Duplicate proxy name: {}", proxy.name)));
            }
            if proxy.remote_port == 0 {
                return Err(invalid(format!("Proxy {}: remote_port must not be 0", proxy.name)));
            }
            if proxy.proxy_type == ProxyType::TcpRedir && proxy.local_port == 0 {
                return Err(invalid(format!("Proxy {}: local_port must not be 0", proxy.name)));
            }
        }
        Ok(())
    }

    /// Proxies of the given kind
    pub fn proxies_of(&self, proxy_type: ProxyType) -> impl Iterator<Item = &ProxyServiceConfig> {
        self.proxies
            .iter()
            .filter(move |p| p.proxy_type == proxy_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(name: &str, proxy_type: ProxyType) -> ProxyServiceConfig {
        ProxyServiceConfig {
            name: name.to_string(),
            proxy_type,
            local_ip: default_local_ip(),
            local_port: 1080,
            remote_port: 6000,
            dialect: Dialect::Negotiated,
        }
    }

    fn config(proxies: Vec<ProxyServiceConfig>) -> Config {
        Config {
            common: CommonConfig {
                server_addr: "203.0.113.7".to_string(),
                server_port: default_server_port(),
                tcp_mux: true,
                connect_timeout: None,
                resolve_timeout: None,
                tcp: TcpConfig::default(),
            },
            proxies,
        }
    }

    #[test]
    fn test_validate_ok() {
        let config = config(vec![
            proxy("socks", ProxyType::Socks5),
            proxy("ssh", ProxyType::TcpRedir),
        ]);
        assert!(config.validate().is_ok());
        assert_eq!(config.proxies_of(ProxyType::TcpRedir).count(), 1);
    }

    #[test]
    fn test_validate_duplicate_names() {
        let config = config(vec![
            proxy("socks", ProxyType::Socks5),
            proxy("socks", ProxyType::TcpRedir),
        ]);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SocksmuxError::Config(_)));
        assert!(err.to_string().contains("Duplicate proxy name: socks"));
    }

    #[test]
    fn test_validate_zero_port() {
        let mut bad = proxy("socks", ProxyType::Socks5);
        bad.remote_port = 0;
        assert!(config(vec![bad]).validate().is_err());

        let mut socks = proxy("socks", ProxyType::Socks5);
        socks.local_port = 0;
        assert!(config(vec![socks]).validate().is_ok());

        let mut redir = proxy("ssh", ProxyType::TcpRedir);
        redir.local_port = 0;
        assert!(config(vec![redir]).validate().is_err());

        let mut config = config(Vec::new());
        config.common.server_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_connect_timeout() {
        let mut config = config(Vec::new());
        config.common.connect_timeout = Some(0);
        assert!(config.validate().is_err());

        config.common.connect_timeout = Some(5);
        assert!(config.validate().is_ok());
        assert_eq!(config.common.connect_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.common.resolve_timeout(), None);
    }
}
