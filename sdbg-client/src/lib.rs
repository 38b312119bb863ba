//! # sdbg-client
//!
//! Client library for sdbg.
//!
//! This crate provides:
//! - Byte transports over raw TCP and WebSocket-wrapped TCP
//! - The session handshake and immutable session facts
//! - The function/breakpoint registry with pending-breakpoint resolution
//! - The protocol engine turning server traffic into shell-renderable actions

pub mod channel;
pub mod engine;
pub mod error;
pub mod registry;

pub use channel::{Channel, Poll, TcpChannel, WebSocketChannel};
pub use engine::{
    Action, ClientSource, Engine, EngineConfig, NoSources, Session, SetBreakpoint, SourceSupplier,
};
pub use error::{ChannelError, SessionError};
pub use registry::{BreakTarget, BreakpointKey, HitKind, Registry};
