//! SOCKS5 session state machine
//!
//! A session consumes bytes from its [`InboundBuffer`] and reports how many
//! it consumed per call. Two dialects share one machine:
//!
//! - **direct-init**: the first bytes are an address frame, no greeting.
//!   States `Init -> Established`.
//! - **negotiated**: greeting `{5, 1, 0}` answered with `{5, 0, 0}`, then a
//!   `{5, CONNECT, 0}` request header followed by an address frame.
//!   States `Init -> Handshake -> Connected`.
//!
//! Input is only committed once a whole protocol unit has been accepted and
//! its side effects (reply, outbound connect) have succeeded. Every error is
//! fatal to the session.

use super::buffer::InboundBuffer;
use super::codec::parse_address;
use super::connector::Connector;
use super::consts::*;
use super::relay::Uplink;
use super::types::TargetAddr;
use crate::error::{AddressError, SessionError, Socks5Error};
use crate::mux::StreamId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, error, info, warn};

/// Negotiation variant spoken on a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Legacy: bare address frame, no greeting
    DirectInit,
    /// Greeting, then request header and address
    #[default]
    Negotiated,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::DirectInit => write!(f, "direct-init"),
            Dialect::Negotiated => write!(f, "negotiated"),
        }
    }
}

/// States of the direct-init dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectInitState {
    /// Waiting for the address frame
    Init,
    /// Outbound link open, relaying
    Established,
}

/// States of the negotiated dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedState {
    /// Waiting for the greeting
    Init,
    /// Waiting for the request
    Handshake,
    /// Outbound link open, relaying
    Connected,
}

/// Session state, tagged by dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Direct-init dialect state
    DirectInit(DirectInitState),
    /// Negotiated dialect state
    Negotiated(NegotiatedState),
}

/// What a state expects from the next input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Greeting,
    Request {
        header: Option<[u8; 3]>,
        min_len: usize,
    },
    Forward,
}

impl SessionState {
    /// Starting state for `dialect`
    pub fn initial(dialect: Dialect) -> Self {
        match dialect {
            Dialect::DirectInit => SessionState::DirectInit(DirectInitState::Init),
            Dialect::Negotiated => SessionState::Negotiated(NegotiatedState::Init),
        }
    }

    /// Whether the session is past negotiation and relaying payload
    pub fn is_relaying(&self) -> bool {
        self.step() == Step::Forward
    }

    fn step(&self) -> Step {
        match self {
            SessionState::DirectInit(DirectInitState::Init) => Step::Request {
                header: None,
                min_len: IPV4_FRAME_LEN,
            },
            SessionState::DirectInit(DirectInitState::Established) => Step::Forward,
            SessionState::Negotiated(NegotiatedState::Init) => Step::Greeting,
            SessionState::Negotiated(NegotiatedState::Handshake) => Step::Request {
                header: Some(SOCKS5_CONNECT_HEADER),
                min_len: MIN_REQUEST_LEN,
            },
            SessionState::Negotiated(NegotiatedState::Connected) => Step::Forward,
        }
    }

    /// State after the current step succeeds
    fn next(self) -> Self {
        match self {
            SessionState::DirectInit(DirectInitState::Init) => {
                SessionState::DirectInit(DirectInitState::Established)
            }
            SessionState::Negotiated(NegotiatedState::Init) => {
                SessionState::Negotiated(NegotiatedState::Handshake)
            }
            SessionState::Negotiated(NegotiatedState::Handshake) => {
                SessionState::Negotiated(NegotiatedState::Connected)
            }
            relaying @ (SessionState::DirectInit(DirectInitState::Established)
            | SessionState::Negotiated(NegotiatedState::Connected)) => relaying,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::DirectInit(state) => write!(f, "direct-init/{:?}", state),
            SessionState::Negotiated(state) => write!(f, "negotiated/{:?}", state),
        }
    }
}

/// Split outbound connection of a session
struct OutboundLink<L> {
    reader: Option<ReadHalf<L>>,
    writer: WriteHalf<L>,
}

/// One proxied connection
///
/// `C` opens the outbound link; `W` is the direct tunnel writer type used by
/// the session's [`Uplink`].
pub struct Session<C: Connector, W> {
    stream_id: StreamId,
    state: SessionState,
    remote_addr: Option<TargetAddr>,
    outbound: Option<OutboundLink<C::Link>>,
    uplink: Option<Uplink<W>>,
    connector: Arc<C>,
}

impl<C: Connector, W> fmt::Debug for Session<C, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("stream_id", &self.stream_id)
            .field("state", &self.state)
            .field("remote_addr", &self.remote_addr)
            .field("has_outbound", &self.outbound.is_some())
            .finish()
    }
}

impl<C, W> Session<C, W>
where
    C: Connector,
    W: AsyncWrite + Unpin,
{
    /// Create a session in the initial state of `dialect`
    pub fn new(stream_id: StreamId, dialect: Dialect, connector: Arc<C>, uplink: Uplink<W>) -> Self {
        Session {
            stream_id,
            state: SessionState::initial(dialect),
            remote_addr: None,
            outbound: None,
            uplink: Some(uplink),
            connector,
        }
    }

    /// Stream id of the session
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Destination requested by the client, once parsed
    pub fn remote_addr(&self) -> Option<&TargetAddr> {
        self.remote_addr.as_ref()
    }

    /// Whether the outbound link is open
    pub fn has_outbound(&self) -> bool {
        self.outbound.is_some()
    }

    /// Borrow the uplink while it is still owned by the session
    pub fn uplink(&self) -> Option<&Uplink<W>> {
        self.uplink.as_ref()
    }

    /// Consume input from `input`
    ///
    /// Returns the number of bytes consumed. `Ok(0)` means more bytes are
    /// needed and nothing changed. On error nothing was consumed and the
    /// session must be torn down.
    pub async fn feed(&mut self, input: &mut InboundBuffer) -> Result<usize, SessionError> {
        match self.state.step() {
            Step::Greeting => self.accept_greeting(input).await,
            Step::Request { header, min_len } => self.accept_request(input, header, min_len).await,
            Step::Forward => self.forward(input).await,
        }
    }

    /// Hand the relay parts to the caller once connected
    ///
    /// Returns the outbound read half and the uplink. Only available once,
    /// and only after the session reached its relaying state.
    pub fn take_relay(&mut self) -> Option<(ReadHalf<C::Link>, Uplink<W>)> {
        if !self.state.is_relaying() {
            return None;
        }
        let reader = self.outbound.as_mut()?.reader.take()?;
        let uplink = self.uplink.take()?;
        Some((reader, uplink))
    }

    /// Take the outbound write half, ending the session's own forwarding
    pub fn take_outbound_writer(&mut self) -> Option<WriteHalf<C::Link>> {
        self.outbound.take().map(|link| link.writer)
    }

    /// Close the outbound link, if open
    pub async fn close(&mut self) {
        if let Some(mut link) = self.outbound.take() {
            if let Err(e) = link.writer.shutdown().await {
                debug!("Stream {}: outbound shutdown: {}", self.stream_id, e);
            }
        }
    }

    async fn accept_greeting(&mut self, input: &mut InboundBuffer) -> Result<usize, SessionError> {
        let Some(greeting) = input.peek(SOCKS5_GREETING.len()) else {
            return Ok(0);
        };
        if greeting != SOCKS5_GREETING {
            let mut bytes = [0u8; 3];
            bytes.copy_from_slice(greeting);
            error!("Stream {}: invalid greeting {:02x?}", self.stream_id, bytes);
            return Err(Socks5Error::InvalidGreeting(bytes).into());
        }

        let uplink = self.uplink.as_mut().ok_or_else(|| {
            SessionError::Resource("greeting reply without a tunnel link".to_string())
        })?;
        uplink.forward(&SOCKS5_GREETING_REPLY).await?;

        input.commit(SOCKS5_GREETING.len())?;
        self.state = self.state.next();
        debug!("Stream {}: greeting accepted", self.stream_id);
        Ok(SOCKS5_GREETING.len())
    }

    async fn accept_request(
        &mut self,
        input: &mut InboundBuffer,
        header: Option<[u8; 3]>,
        min_len: usize,
    ) -> Result<usize, SessionError> {
        if self.outbound.is_some() {
            return self.reject("request received with outbound link already open").await;
        }
        if input.len() < min_len {
            return Ok(0);
        }

        let header_len = match header {
            Some(expected) => {
                let got = input.peek(expected.len()).unwrap_or_default();
                if got != expected {
                    let mut bytes = [0u8; 3];
                    bytes.copy_from_slice(got);
                    error!("Stream {}: invalid request header {:02x?}", self.stream_id, bytes);
                    return Err(Socks5Error::InvalidRequest(bytes).into());
                }
                expected.len()
            }
            None => 0,
        };

        let available = input.peek_all();
        let window_end = available.len().min(header_len + MAX_ADDRESS_FRAME_LEN);
        let (addr, addr_len) = match parse_address(&available[header_len..window_end]) {
            Ok(parsed) => parsed,
            Err(AddressError::Incomplete { needed, available }) => {
                debug!(
                    "Stream {}: address frame needs {} bytes, have {}",
                    self.stream_id, needed, available
                );
                return Ok(0);
            }
            Err(AddressError::Invalid(e)) => {
                error!("Stream {}: {}", self.stream_id, e);
                return Err(e.into());
            }
        };

        let consumed = header_len + addr_len;
        if consumed > input.len() {
            return Err(SessionError::Desync {
                requested: consumed,
                available: input.len(),
            });
        }

        debug!("Stream {}: connecting to {}", self.stream_id, addr);
        self.remote_addr = Some(addr.clone());
        let link = self.connector.connect(&addr).await?;
        let (reader, writer) = tokio::io::split(link);
        self.outbound = Some(OutboundLink {
            reader: Some(reader),
            writer,
        });

        input.commit(consumed)?;
        self.state = self.state.next();
        info!("Stream {}: connected to {} ({})", self.stream_id, addr, self.state);
        Ok(consumed)
    }

    async fn forward(&mut self, input: &mut InboundBuffer) -> Result<usize, SessionError> {
        let Some(link) = self.outbound.as_mut() else {
            return self.reject("relaying without an outbound link").await;
        };
        if input.is_empty() {
            return Ok(0);
        }

        let data = input.take_all();
        link.writer.write_all(&data).await?;
        Ok(data.len())
    }

    async fn reject(&mut self, reason: &str) -> Result<usize, SessionError> {
        warn!("Stream {}: {} in state {}", self.stream_id, reason, self.state);
        self.close().await;
        Err(Socks5Error::InvalidState(reason.to_string()).into())
    }
}
