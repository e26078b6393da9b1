//! Authoritative tick engine for the cytos cell arena.

pub mod bot;
pub mod cell;
pub mod config;
pub mod control;
mod engine;
mod error;
pub mod gamemodes;
pub mod geometry;
pub mod handle;
pub mod player;
pub mod pool;
pub mod spatial;
mod workers;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export commonly used types
pub use config::{Config, ModeConfig};
pub use engine::{Engine, PhaseQueries, QUERY_LEVELS, QueryStats, SPECTATE_BIGGEST, TickTimings, WinEvent};
pub use error::EngineError;
pub use handle::HandleId;
pub use player::Input;
pub use workers::WorkerPool;

/// Lock ignoring poisoning. No engine lock guards an invariant that a
/// panicking holder could leave half-written.
#[inline]
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
