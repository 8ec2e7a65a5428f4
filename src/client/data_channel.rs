//! Per-session drivers
//!
//! A session either owns a dedicated tunnel connection (direct mode) or is
//! one stream of a multiplexed control connection. Both drivers feed the
//! session until it is relaying, then run both relay directions until one
//! of them ends; the other is torn down with it.

use crate::error::SessionError;
use crate::mux::{MuxStream, MuxWrite, StreamId};
use crate::socks::{
    run_downlink, Connector, Dialect, InboundBuffer, RelayMode, Session, Uplink,
    DEFAULT_BUFFER_SIZE,
};
use crate::transport::{ServerAddr, TcpTransport};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, Sink};
use tracing::{debug, info, warn};

/// Feed buffered input until the session stops making progress
async fn feed_available<C, W>(
    session: &mut Session<C, W>,
    input: &mut InboundBuffer,
) -> Result<(), SessionError>
where
    C: Connector,
    W: AsyncWrite + Unpin,
{
    while !input.is_empty() {
        if session.feed(input).await? == 0 {
            break;
        }
    }
    Ok(())
}

fn relay_parts_missing(stream_id: StreamId) -> SessionError {
    SessionError::Resource(format!("stream {}: relay parts already taken", stream_id))
}

/// Serve one session over its own tunnel connection
///
/// Returns once either side closes. Errors are fatal to this session only.
pub async fn serve_direct_session<S, C>(
    tunnel: S,
    stream_id: StreamId,
    dialect: Dialect,
    connector: Arc<C>,
    mode: RelayMode,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    C: Connector,
{
    let (mut tunnel_rd, tunnel_wr) = tokio::io::split(tunnel);
    let uplink = Uplink::direct(stream_id, mode.clone(), tunnel_wr);
    let mut session = Session::new(stream_id, dialect, connector, uplink);
    let mut input = InboundBuffer::with_capacity(DEFAULT_BUFFER_SIZE);

    while !session.state().is_relaying() {
        input.as_mut().reserve(DEFAULT_BUFFER_SIZE);
        if tunnel_rd.read_buf(input.as_mut()).await? == 0 {
            debug!("Stream {}: tunnel closed during negotiation", stream_id);
            return Ok(());
        }
        feed_available(&mut session, &mut input).await?;
    }

    let (outbound_rd, mut uplink) = session
        .take_relay()
        .ok_or_else(|| relay_parts_missing(stream_id))?;
    let outbound_wr = session
        .take_outbound_writer()
        .ok_or_else(|| relay_parts_missing(stream_id))?;

    tokio::select! {
        result = uplink.run(outbound_rd) => match result {
            Ok(bytes) => debug!("Stream {}: outbound->tunnel finished: {} bytes", stream_id, bytes),
            Err(e) => debug!("Stream {}: outbound->tunnel error: {}", stream_id, e),
        },
        result = run_downlink(&mode, tunnel_rd, outbound_wr) => match result {
            Ok(bytes) => debug!("Stream {}: tunnel->outbound finished: {} bytes", stream_id, bytes),
            Err(e) => debug!("Stream {}: tunnel->outbound error: {}", stream_id, e),
        },
    }

    if let Err(e) = uplink.shutdown().await {
        debug!("Stream {}: tunnel shutdown: {}", stream_id, e);
    }
    info!("Stream {}: session closed", stream_id);
    Ok(())
}

/// Serve one session carried by a multiplexed stream
///
/// Inbound stream data is fed to the session, which writes it to the
/// outbound link once connected. Dropping the stream on return sends FIN.
pub async fn serve_mux_stream<C: Connector>(
    mut stream: MuxStream,
    dialect: Dialect,
    connector: Arc<C>,
    mode: RelayMode,
) -> Result<(), SessionError> {
    let stream_id = stream.id();
    let control: Arc<dyn MuxWrite> = stream.control();
    let uplink: Uplink<Sink> = Uplink::multiplexed(stream_id, mode, control);
    let mut session = Session::new(stream_id, dialect, connector, uplink);
    let mut input = InboundBuffer::new();

    while !session.state().is_relaying() {
        let Some(chunk) = stream.recv().await else {
            debug!("Stream {}: closed during negotiation", stream_id);
            return Ok(());
        };
        input.extend(&chunk);
        feed_available(&mut session, &mut input).await?;
    }

    let (outbound_rd, mut uplink) = session
        .take_relay()
        .ok_or_else(|| relay_parts_missing(stream_id))?;

    let downlink = async {
        while let Some(chunk) = stream.recv().await {
            input.extend(&chunk);
            feed_available(&mut session, &mut input).await?;
        }
        Ok::<(), SessionError>(())
    };

    let result = tokio::select! {
        result = uplink.run(outbound_rd) => result.map(|bytes| {
            debug!("Stream {}: outbound->mux finished: {} bytes", stream_id, bytes);
        }).map_err(SessionError::from),
        result = downlink => result.map(|_| {
            debug!("Stream {}: mux stream closed by peer", stream_id);
        }),
    };

    session.close().await;
    info!("Stream {}: session closed", stream_id);
    result
}

/// Serve direct-mode sessions over tunnel connections dialed to the server
///
/// One idle tunnel connection is kept open. The server starts a session by
/// sending on it; the connection is then handed to its own session task and
/// the next one is dialed. An unreachable server, or one that closes an idle
/// connection, ends the loop. Nothing is retried here.
pub async fn run_tunnel_connections<C: Connector>(
    server: ServerAddr,
    transport: TcpTransport,
    dialect: Dialect,
    connector: Arc<C>,
    mode: RelayMode,
) -> Result<()> {
    let mut next_id: StreamId = 1;

    loop {
        let conn = transport
            .connect(&server)
            .await
            .with_context(|| format!("Failed to open tunnel connection to {}", server))?;

        let mut first = [0u8; 1];
        if conn.peek(&mut first).await? == 0 {
            bail!("Server {} closed an idle tunnel connection", server);
        }

        let stream_id = next_id;
        next_id = next_id.wrapping_add(1);
        debug!("Stream {}: tunnel connection to {} in use", stream_id, server);

        let connector = connector.clone();
        let mode = mode.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_direct_session(conn, stream_id, dialect, connector, mode).await {
                warn!("Stream {}: session error: {}", stream_id, e);
            }
        });
    }
}
