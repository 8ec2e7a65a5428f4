//! Main client structure
//!
//! Starts every configured proxy and runs until shutdown or until one of
//! them fails.

use super::control_channel::ControlChannel;
use super::data_channel::run_tunnel_connections;
use crate::config::{Config, ProxyServiceConfig, ProxyType};
use crate::redirect::{start_redirect_service, RedirectHandle};
use crate::socks::{RelayMode, TcpConnector, TokioResolver};
use crate::transport::{ServerAddr, TcpTransport};
use anyhow::{Context, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Main Socksmux client
#[derive(Debug)]
pub struct Client {
    config: Config,
    connector: Arc<TcpConnector>,
    mode: RelayMode,
}

impl Client {
    /// Create a new client with the given configuration
    pub fn new(config: Config) -> Self {
        let connector = TcpConnector::new(Arc::new(TokioResolver))
            .with_connect_timeout(config.common.connect_timeout())
            .with_resolve_timeout(config.common.resolve_timeout());
        let mode = RelayMode::new(config.common.tcp_mux);

        Client {
            config,
            connector: Arc::new(connector),
            mode,
        }
    }

    /// Forwarding mode switch shared by every session
    pub fn mode(&self) -> &RelayMode {
        &self.mode
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start redirect workers
    ///
    /// A worker that cannot bind or reach the server aborts startup.
    pub fn start_redirects(&self) -> Result<Vec<RedirectHandle>> {
        self.config
            .proxies_of(ProxyType::TcpRedir)
            .map(|proxy| {
                start_redirect_service(proxy, &self.config.common.server_addr, &self.config.common.tcp)
                    .with_context(|| format!("Failed to start redirect proxy {}", proxy.name))
            })
            .collect()
    }

    /// Run the client until shutdown
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        info!("Starting Socksmux client");
        info!(
            "Remote server: {}:{} (tcp_mux = {})",
            self.config.common.server_addr,
            self.config.common.server_port,
            self.mode.is_multiplexed()
        );

        let redirects = self.start_redirects()?;
        for handle in &redirects {
            info!("Redirect proxy {} listening on {}", handle.name(), handle.local_addr());
        }

        let proxies = self
            .config
            .proxies_of(ProxyType::Socks5)
            .map(|proxy| self.run_socks_proxy(proxy));

        tokio::select! {
            result = try_join_all(proxies) => {
                if let Err(e) = result {
                    error!("Proxy error: {:#}", e);
                    return Err(e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping client");
            }
        }

        info!("Client stopped");
        Ok(())
    }

    async fn run_socks_proxy(&self, proxy: &ProxyServiceConfig) -> Result<()> {
        let common = &self.config.common;

        if self.mode.is_multiplexed() {
            let channel = ControlChannel::new(
                &proxy.name,
                ServerAddr::new(&common.server_addr, common.server_port),
                TcpTransport::new(&common.tcp),
                self.connector.clone(),
                proxy.dialect,
                self.mode.clone(),
            );
            return channel.run().await;
        }

        let server = ServerAddr::new(&common.server_addr, proxy.remote_port);
        info!(
            "[{}] Serving {} sessions over tunnel connections to {}",
            proxy.name, proxy.dialect, server
        );

        run_tunnel_connections(
            server,
            TcpTransport::new(&common.tcp),
            proxy.dialect,
            self.connector.clone(),
            self.mode.clone(),
        )
        .await
        .with_context(|| format!("[{}] Tunnel connections failed", proxy.name))
    }
}
