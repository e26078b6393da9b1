//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while decoding a frame or envelope.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unexpected end of data")]
    UnexpectedEof,

    #[error("Invalid cache entry flag: {0:#04x}")]
    InvalidSubop(u8),

    #[error("Eater index {0} is outside the cache")]
    EaterOutOfRange(u16),

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    #[error("Cache size mismatch: expected {expected}, got {actual}")]
    CacheMismatch { expected: u32, actual: u32 },

    #[error("Invalid UTF-8 in mode name")]
    InvalidModeName,
}
