//! Game-mode strategies.
//!
//! Everything a mode can customise beyond its option table goes through
//! [`GameMode`]. The engine holds the mode behind an `Arc` and clones it
//! before calling a hook, so hooks get the whole engine mutably.

use crate::bot::BotBrain;
use crate::cell::CellId;
use crate::config::ModeConfig;
use crate::engine::{Engine, WinEvent};
use crate::handle::{HandleId, HandleKind};

pub mod rockslide;
pub mod standard;

pub trait GameMode: Send + Sync {
    fn name(&self) -> &str;

    /// Perk cells are hidden from players who may not eat them yet.
    fn hides_perks(&self) -> bool {
        true
    }

    fn dual_enabled(&self, config: &ModeConfig) -> bool {
        config.world.dual_enabled
    }

    fn spawns_viruses(&self) -> bool {
        true
    }

    fn spawns_perks(&self) -> bool {
        true
    }

    /// Whether a saved pool is rebuilt on restore. Modes that return false
    /// restart the world instead.
    fn restores_state(&self) -> bool {
        true
    }

    /// The `replace` flag a delayed kill is queued with.
    fn delay_kill_replaces(&self, replace: bool) -> bool {
        replace
    }

    /// Called once at construction and after every world restart.
    fn on_restart(&self, _engine: &mut Engine) {}

    /// Called after a handle and its control were created.
    fn on_handle_added(&self, _engine: &mut Engine, _handle: HandleId) {}

    /// Create one bot, reusing `control` as its control id when given.
    fn create_bot(&self, engine: &mut Engine, control: Option<u16>) -> HandleId {
        engine.insert_bot(HandleKind::Bot(BotBrain::default()), control.unwrap_or(1))
    }

    /// Grow or shrink the bot population by at most one per tick.
    fn spawn_bots(&self, engine: &mut Engine) {
        let desired = engine.desired_bots() as usize;
        if engine.bots().len() < desired {
            self.create_bot(engine, None);
        }
        if engine.bots().len() > desired {
            engine.drop_weakest_bot();
        }
    }

    /// Place a bot's first cell. Returns false when no spot was found.
    fn spawn_bot_control(&self, engine: &mut Engine, control: u16) -> bool {
        engine.spawn_bot_cell(control)
    }

    /// Place a player's first cell. Returns false when no spot was found.
    fn spawn_player_control(&self, engine: &mut Engine, control: u16) -> bool {
        engine.spawn_player_cell(control)
    }

    /// Win conditions, checked after every resolve.
    fn post_resolve(&self, _engine: &mut Engine) -> Vec<WinEvent> {
        Vec::new()
    }

    /// A cell outside every index that all viewers see.
    fn extra_visible(&self) -> Option<CellId> {
        None
    }
}

/// Look up a mode by name. Every name without custom rules runs the
/// table-driven [`standard::Standard`] mode.
pub fn get_gamemode(name: &str) -> Box<dyn GameMode> {
    match name {
        "rockslide" => Box::new(rockslide::Rockslide::new()),
        _ => Box::new(standard::Standard::new(name)),
    }
}
