//! Protocol error types.

use thiserror::Error;

/// Wire-level errors raised while reading or building message payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated payload: need {needed} more bytes")]
    Truncated { needed: usize },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("message too large for one frame: {0} bytes")]
    MessageTooLarge(usize),

    #[error("16-bit payload has odd length: {0}")]
    OddWidePayload(usize),

    #[error("message type {got} does not continue the open field (family base {base})")]
    FragmentOutOfOrder { base: u8, got: u8 },

    #[error("unsupported pointer width: {0}")]
    InvalidPointerWidth(u8),
}
