//! # sdbg-protocol
//!
//! Wire protocol implementation for sdbg (SDP - the sdbg debug protocol).
//!
//! This crate provides:
//! - Message type codes for both transfer directions
//! - Byte-order aware payload reading and message building
//! - The fragmented-string codec (8-bit and 16-bit text paths)
//! - Protocol constants and error types

pub mod codec;
pub mod error;
pub mod message;
pub mod wire;

pub use codec::{fragment, StringAssembler, StringFamily};
pub use error::ProtocolError;
pub use wire::{ByteOrder, MessageBuilder, PayloadReader, PointerWidth};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default port for a debug server.
pub const DEFAULT_PORT: u16 = 6501;

/// Size of the version frame payload sent right after connecting
/// (type byte + endianness flag + 4-byte version).
pub const VERSION_FRAME_SIZE: usize = 6;

/// Largest message size a WebSocket channel can carry: the payload length
/// must fit the one-byte short form of the frame header.
pub const MAX_WEBSOCKET_MESSAGE_SIZE: u8 = 125;
