//! Client module for Socksmux
//!
//! Drives SOCKS5 sessions over either dedicated tunnel connections or a
//! multiplexed control connection, and starts the redirect workers.

#[allow(clippy::module_inception)]
mod client;
mod control_channel;
mod data_channel;

pub use client::Client;
pub use control_channel::ControlChannel;
pub use data_channel::{run_tunnel_connections, serve_direct_session, serve_mux_stream};

use crate::config::Config;
use anyhow::Result;
use tokio::sync::broadcast;

/// Run the client with the given configuration
pub async fn run_client(config: Config, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    Client::new(config).run(shutdown_rx).await
}
