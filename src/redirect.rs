//! Plain TCP redirect workers
//!
//! A `tcp_redir` proxy forwards a local port to a port on the server without
//! any SOCKS negotiation. Each worker runs on its own OS thread with its own
//! single-threaded runtime, so nothing is shared with the session pool or
//! with other workers.

use crate::config::{ProxyServiceConfig, TcpConfig};
use crate::transport::{ServerAddr, TcpTransport};
use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Handle to a running redirect worker
#[derive(Debug)]
pub struct RedirectHandle {
    name: String,
    local_addr: SocketAddr,
    thread: JoinHandle<()>,
}

impl RedirectHandle {
    /// Proxy name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the worker listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Start a redirect worker for `service`
///
/// Binds `local_ip:local_port` and connects to `server_host:remote_port`
/// before returning. Either failure is returned to the caller and the
/// worker does not start.
pub fn start_redirect_service(
    service: &ProxyServiceConfig,
    server_host: &str,
    tcp: &TcpConfig,
) -> Result<RedirectHandle> {
    let name = service.name.clone();
    let bind_addr = format!("{}:{}", service.local_ip, service.local_port);
    let server = ServerAddr::new(server_host, service.remote_port);
    let transport = TcpTransport::new(tcp);
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<SocketAddr>>();

    let thread_name = format!("redirect-{}", name);
    let worker_name = name.clone();
    let thread = std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow!(e).context("Failed to build runtime")));
                    return;
                }
            };

            runtime.block_on(async move {
                let startup = async {
                    let listener = TcpListener::bind(&bind_addr)
                        .await
                        .with_context(|| format!("Failed to bind {}", bind_addr))?;
                    let first = transport
                        .connect(&server)
                        .await
                        .with_context(|| format!("Failed to connect to {}", server))?;
                    Ok::<_, anyhow::Error>((listener, first))
                };

                let (listener, first) = match startup.await {
                    Ok(resources) => resources,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let local_addr = match listener.local_addr() {
                    Ok(addr) => addr,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(local_addr));

                if let Err(e) = accept_loop(&worker_name, listener, first, &server, &transport).await {
                    error!("[{}] Redirect worker stopped: {:#}", worker_name, e);
                }
            });
        })
        .context("Failed to spawn redirect worker thread")?;

    let local_addr = ready_rx
        .recv()
        .context("Redirect worker exited during startup")??;

    info!("[{}] Redirecting {} -> {}:{}", name, local_addr, server_host, service.remote_port);
    Ok(RedirectHandle {
        name,
        local_addr,
        thread,
    })
}

async fn accept_loop(
    name: &str,
    listener: TcpListener,
    first: TcpStream,
    server: &ServerAddr,
    transport: &TcpTransport,
) -> Result<()> {
    let mut startup_conn = Some(first);

    loop {
        let (local, peer) = listener.accept().await.context("Accept failed")?;
        debug!("[{}] Accepted {}", name, peer);

        let remote = match startup_conn.take() {
            Some(conn) => conn,
            None => match transport.connect(server).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("[{}] Failed to reach {}: {:#}", name, server, e);
                    continue;
                }
            },
        };

        let name = name.to_string();
        tokio::spawn(async move {
            relay_pair(local, remote).await;
            debug!("[{}] Relay for {} closed", name, peer);
        });
    }
}

/// Copy bytes both ways until either side ends, then close both
pub async fn relay_pair<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = tokio::io::copy(&mut a_read, &mut b_write);
    let b_to_a = tokio::io::copy(&mut b_read, &mut a_write);

    tokio::select! {
        result = a_to_b => match result {
            Ok(bytes) => debug!("local->server finished: {} bytes", bytes),
            Err(e) => debug!("local->server error: {}", e),
        },
        result = b_to_a => match result {
            Ok(bytes) => debug!("server->local finished: {} bytes", bytes),
            Err(e) => debug!("server->local error: {}", e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyType;
    use crate::socks::Dialect;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn service(local_port: u16, remote_port: u16) -> ProxyServiceConfig {
        ProxyServiceConfig {
            name: "redir".to_string(),
            proxy_type: ProxyType::TcpRedir,
            local_ip: "127.0.0.1".to_string(),
            local_port,
            remote_port,
            dialect: Dialect::Negotiated,
        }
    }

    #[tokio::test]
    async fn test_relay_pair_closes_partner() {
        let (mut a_peer, a) = tokio::io::duplex(64);
        let (mut b_peer, b) = tokio::io::duplex(64);
        let relay = tokio::spawn(relay_pair(a, b));

        a_peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        b_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(a_peer);
        relay.await.unwrap();

        let mut rest = Vec::new();
        b_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_startup_fails_when_server_unreachable() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_port = closed.local_addr().unwrap().port();
        drop(closed);

        let result = start_redirect_service(
            &service(0, remote_port),
            "127.0.0.1",
            &TcpConfig::default(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_startup_fails_when_port_taken() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let result = start_redirect_service(
            &service(
                taken.local_addr().unwrap().port(),
                server.local_addr().unwrap().port(),
            ),
            "127.0.0.1",
            &TcpConfig::default(),
        );
        assert!(result.is_err());
    }
}
