//! Error types for Socksmux
//!
//! This module defines all custom error types used throughout the crate.
//! Session-level failures follow a three-way taxonomy (protocol, resource,
//! desync); every one of them is fatal to the session it occurred in and
//! none of them is retried.

use std::io;
use thiserror::Error;

/// Main error type for Socksmux operations
#[derive(Error, Debug)]
pub enum SocksmuxError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Multiplexer error
    #[error("Multiplexer error: {0}")]
    Mux(String),
}

/// SOCKS5 wire-level protocol violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Socks5Error {
    /// Greeting did not match `{5, 1, no-auth}`
    #[error("Invalid greeting: {0:02x?}")]
    InvalidGreeting([u8; 3]),

    /// Request header did not match `{5, CONNECT, 0}`
    #[error("Invalid request header: {0:02x?}")]
    InvalidRequest([u8; 3]),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Invalid domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// Input arrived in a state that cannot accept it
    #[error("Invalid protocol state: {0}")]
    InvalidState(String),
}

/// Outcome of a failed address parse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Not enough bytes buffered yet for the declared address kind
    #[error("Incomplete address: need {needed} bytes, have {available}")]
    Incomplete {
        /// Total frame length required
        needed: usize,
        /// Bytes currently available
        available: usize,
    },

    /// The frame can never become valid
    #[error(transparent)]
    Invalid(#[from] Socks5Error),
}

/// Coarse classification of a [`SessionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed greeting, header or address
    Protocol,
    /// Allocation, resolution or connect failure
    Resource,
    /// Buffer accounting corruption
    Desync,
}

/// Errors that end a single proxy session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Protocol violation by the peer
    #[error("Protocol error: {0}")]
    Protocol(#[from] Socks5Error),

    /// Missing or unusable resource
    #[error("Resource error: {0}")]
    Resource(String),

    /// Outbound connection could not be established
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        /// Destination that was being dialed
        target: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Domain name could not be resolved to an IPv4 address
    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        /// Host name that was being resolved
        host: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Consumed-byte accounting does not match the buffer
    #[error("Buffer desync: tried to consume {requested} bytes with {available} available")]
    Desync {
        /// Bytes the parser claimed to consume
        requested: usize,
        /// Bytes actually buffered
        available: usize,
    },

    /// IO error on one of the session's links
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Classify this error according to the session error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Protocol(_) => ErrorKind::Protocol,
            SessionError::Desync { .. } => ErrorKind::Desync,
            SessionError::Resource(_)
            | SessionError::Connect { .. }
            | SessionError::Resolve { .. }
            | SessionError::Io(_) => ErrorKind::Resource,
        }
    }
}

/// Errors raised by the relay data path
#[derive(Error, Debug)]
pub enum RelayError {
    /// The server-to-client callback fired while multiplexing is enabled.
    /// That direction belongs to the multiplexer's stream delivery path.
    #[error("Server-to-client relay reached while multiplexing is enabled")]
    UnexpectedDownlink,

    /// Multiplexing is enabled but the session has no control link
    #[error("Multiplexing enabled but no control link is attached")]
    MissingControlLink,

    /// Direct forwarding selected but the session has no direct tunnel link
    #[error("Direct forwarding selected but no tunnel link is attached")]
    MissingDirectLink,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<RelayError> for SessionError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Io(e) => SessionError::Io(e),
            other => SessionError::Resource(other.to_string()),
        }
    }
}
