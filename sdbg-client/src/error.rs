//! Client error types.

use sdbg_protocol::ProtocolError;
use thiserror::Error;

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(&'static str),

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
}

/// Session-level errors. All variants except `ConnectionLost` during a source
/// load are fatal: they unwind the dispatch loop and end the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("protocol version mismatch: server {server}, client {client}")]
    ProtocolVersionMismatch { server: u32, client: u32 },

    #[error("unsupported pointer width: {0}")]
    UnsupportedPointerWidth(u8),

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("unknown message type: {0}")]
    UnknownMessage(u8),

    #[error("connection lost")]
    ConnectionLost,
}
