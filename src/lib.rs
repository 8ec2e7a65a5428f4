//! # Socksmux - Reverse-tunnel SOCKS5 data plane
//!
//! Socksmux is the client side of a reverse tunnel. SOCKS5 sessions reach it
//! through the tunnel, either one per dedicated connection or as streams of
//! a single multiplexed control connection. Each session negotiates a
//! destination, Socksmux opens the outbound connection and relays bytes in
//! both directions.
//!
//! ## Features
//!
//! - **Two SOCKS5 dialects**: the negotiated greeting/request exchange and a
//!   legacy direct-init form that starts with a bare address frame
//! - **Multiplexed or direct forwarding**: switchable at runtime
//! - **Backpressure**: a stalled multiplexed stream pauses reads from its
//!   outbound link until the window drains
//! - **TCP redirect workers**: plain port forwards on isolated threads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksmux::config::load_config;
//! use socksmux::client::run_client;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("socksmux.toml")?;
//!     let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_client(config, shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SOCKS5 Client -> Server -> (control connection | tunnel connection) -> Socksmux -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod mux;
pub mod redirect;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use client::run_client;
pub use config::{load_config, Config};
pub use error::{SessionError, Socks5Error, SocksmuxError};

/// Version of the Socksmux library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
