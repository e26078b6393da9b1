//! Engine error types.

use protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced to the host. Gameplay edge cases never end up here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Mode mismatch: requested \"{requested}\" != current \"{current}\"")]
    ModeMismatch { requested: String, current: String },

    #[error("Unknown game mode: {0}")]
    UnknownMode(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
