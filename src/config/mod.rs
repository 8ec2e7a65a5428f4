//! Configuration module for Socksmux
//!
//! This module provides configuration types and parsing for the client.

mod client;
mod transport;

pub use client::{CommonConfig, Config, ProxyServiceConfig, ProxyType};
pub use transport::TcpConfig;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(content).with_context(|| "Failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SocksmuxError;
    use crate::socks::Dialect;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let config_str = r#"
[common]
server_addr = "server.example.com"
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.common.server_addr, "server.example.com");
        assert_eq!(config.common.server_port, 7000);
        assert!(config.common.tcp_mux);
        assert!(config.common.connect_timeout.is_none());
        assert!(config.proxies.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
[common]
server_addr = "203.0.113.7"
server_port = 7100
tcp_mux = false
connect_timeout = 10
resolve_timeout = 5

[common.tcp]
nodelay = false
keepalive_secs = 30
keepalive_interval = 10

[[proxies]]
name = "socks"
type = "socks5"
local_port = 1080
remote_port = 6000
dialect = "direct_init"

[[proxies]]
name = "ssh"
type = "tcp_redir"
local_ip = "127.0.0.1"
local_port = 2222
remote_port = 6022
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.common.server_port, 7100);
        assert!(!config.common.tcp_mux);
        assert_eq!(config.common.resolve_timeout, Some(5));
        assert!(!config.common.tcp.nodelay);
        assert_eq!(config.common.tcp.keepalive_secs, 30);

        assert_eq!(config.proxies.len(), 2);
        assert_eq!(config.proxies[0].proxy_type, ProxyType::Socks5);
        assert_eq!(config.proxies[0].dialect, Dialect::DirectInit);
        assert_eq!(config.proxies[0].local_ip, "0.0.0.0");
        assert_eq!(config.proxies[1].proxy_type, ProxyType::TcpRedir);
        assert_eq!(config.proxies[1].dialect, Dialect::Negotiated);
        assert_eq!(config.proxies[1].local_ip, "127.0.0.1");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        let config_str = r#"
[common]
server_addr = "203.0.113.7"

[[proxies]]
name = "socks"
type = "socks5"
local_port = 1080
remote_port = 6000
dialect = "socks4"
"#;
        assert!(parse_config(config_str).is_err());

        let config_str = r#"
[common]
server_addr = "203.0.113.7"
connect_timeout = 0
"#;
        let err = parse_config(config_str).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SocksmuxError>(),
            Some(SocksmuxError::Config(_))
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[common]\nserver_addr = \"127.0.0.1\"\nserver_port = 7001").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.common.server_port, 7001);

        assert!(load_config("/nonexistent/socksmux.toml").is_err());
    }
}
