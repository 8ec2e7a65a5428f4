//! Multiplexed control connection
//!
//! One long-lived connection to the server carries every session of a
//! SOCKS5 proxy as a stream. Frames queued by [`MuxControl`] are written by
//! one half of the loop while the other half reads frames and spawns a
//! session per opened stream.

use super::data_channel::serve_mux_stream;
use crate::mux::{read_frame, write_frame, Frame, MuxControl};
use crate::socks::{Connector, Dialect, RelayMode};
use crate::transport::{ServerAddr, SocketOpts, TcpTransport};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Control connection for one SOCKS5 proxy
#[derive(Debug)]
pub struct ControlChannel<C: Connector> {
    name: String,
    server: ServerAddr,
    transport: TcpTransport,
    connector: Arc<C>,
    dialect: Dialect,
    mode: RelayMode,
}

impl<C: Connector> ControlChannel<C> {
    /// Create a control channel
    pub fn new(
        name: &str,
        server: ServerAddr,
        transport: TcpTransport,
        connector: Arc<C>,
        dialect: Dialect,
        mode: RelayMode,
    ) -> Self {
        ControlChannel {
            name: name.to_string(),
            server,
            transport,
            connector,
            dialect,
            mode,
        }
    }

    /// Connect to the server and serve streams until the connection ends
    ///
    /// The connection is not re-established here.
    pub async fn run(&self) -> Result<()> {
        info!("[{}] Connecting control channel to {}", self.name, self.server);
        let conn = self
            .transport
            .clone()
            .with_socket_opts(SocketOpts::for_control_channel())
            .connect(&self.server)
            .await
            .context("Failed to connect to server")?;

        info!("[{}] Control channel established", self.name);
        self.serve(conn).await
    }

    /// Serve streams over an established connection
    ///
    /// Every session carried by the connection is torn down when it ends.
    pub async fn serve<S>(&self, conn: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (control, outgoing) = MuxControl::new();
        let (rd, wr) = tokio::io::split(conn);

        let result = tokio::select! {
            result = Self::write_loop(wr, outgoing) => result,
            result = self.read_loop(rd, control.clone()) => result,
        };

        let open = control.stream_count();
        if open > 0 {
            info!("[{}] Control channel closed, tearing down {} sessions", self.name, open);
        }
        control.shutdown();
        result
    }

    async fn write_loop<W: AsyncWrite + Unpin>(
        mut wr: W,
        mut outgoing: mpsc::UnboundedReceiver<Frame>,
    ) -> Result<()> {
        while let Some(frame) = outgoing.recv().await {
            write_frame(&mut wr, &frame).await?;
        }
        Ok(())
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        mut rd: R,
        control: Arc<MuxControl>,
    ) -> Result<()> {
        loop {
            let frame = read_frame(&mut rd)
                .await
                .context("Control channel read failed")?;

            let Some(stream) = control.handle_frame(frame)? else {
                continue;
            };

            debug!("[{}] Stream {}: new session", self.name, stream.id());
            let connector = self.connector.clone();
            let dialect = self.dialect;
            let mode = self.mode.clone();
            tokio::spawn(async move {
                let id = stream.id();
                if let Err(e) = serve_mux_stream(stream, dialect, connector, mode).await {
                    warn!("Stream {}: session error: {}", id, e);
                }
            });
        }
    }
}
