//! Wire formats for the cytos engine.
//!
//! This crate contains:
//! - Binary reading/writing utilities
//! - The per-viewer delta frame codec
//! - The save envelope framing

mod binary;
pub mod delta;
mod error;
pub mod state;

pub use binary::{BinaryReader, BinaryWriter};
pub use delta::{CachedCell, DeltaDecoder, DeltaEncoder, TabState, ViewHeader};
pub use error::ProtocolError;
pub use state::SaveEnvelope;
