//! Handles: whoever drives a control.

use std::collections::BTreeMap;

use crate::bot::{BotBrain, RockBrain};
use crate::control::Control;
use crate::player::PlayerView;

/// Stable handle identifier assigned by the engine.
pub type HandleId = u32;

/// Permission bits.
pub mod perms {
    pub const BOT_CONTROL: u16 = 0x1;
    pub const PLAYER_CONTROL: u16 = 0x2;
    pub const NO_POP: u16 = 0x4;
    pub const INVINCIBLE: u16 = 0x8;
    pub const NO_EAT: u16 = 0x10;
    pub const TP: u16 = 0x20;
    pub const SPAWN_VIRUS: u16 = 0x40;
    pub const EJECT_PERKS: u16 = 0x80;
    pub const ALL: u16 = 0xFFFF;
}

/// Perk cells eaten since the host last collected them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Perks {
    pub exps: u16,
    pub cyts: u16,
}

impl Perks {
    #[inline]
    pub fn updated(&self) -> bool {
        self.exps != 0 || self.cyts != 0
    }

    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn merge(&mut self, other: Perks) {
        self.exps = self.exps.saturating_add(other.exps);
        self.cyts = self.cyts.saturating_add(other.cyts);
    }
}

/// What sits behind a handle.
#[derive(Debug)]
pub enum HandleKind {
    /// Human viewer with input tabs and a delta cache.
    Player(Box<PlayerView>),
    /// Second input tab of a player.
    Dual { owner: HandleId },
    Bot(BotBrain),
    Rock(RockBrain),
}

#[derive(Debug)]
pub struct Handle {
    pub kind: HandleKind,
    pub perms: u16,
    pub perks: Perks,
    /// Control driven by this handle.
    pub control: Option<u16>,
    /// Partner tab: the dual of a player, or the owner of a dual.
    pub dual: Option<HandleId>,
    pub spectate: Option<HandleId>,
    /// Area of the viewport at the last tick.
    pub view_area: f64,
    pub was_alive: bool,
    /// Time the handle last came alive.
    pub actual_spawn_tick: u64,
}

impl Handle {
    pub fn new(kind: HandleKind, control: u16) -> Self {
        Self {
            kind,
            perms: 0,
            perks: Perks::default(),
            control: Some(control),
            dual: None,
            spectate: None,
            view_area: 0.0,
            was_alive: false,
            actual_spawn_tick: 0,
        }
    }

    #[inline]
    pub fn is_bot(&self) -> bool {
        matches!(self.kind, HandleKind::Bot(_) | HandleKind::Rock(_))
    }

    #[inline]
    pub fn is_player(&self) -> bool {
        matches!(self.kind, HandleKind::Player(_))
    }

    /// Duals are watched through their owner; rocks not at all.
    #[inline]
    pub fn spectatable(&self) -> bool {
        !matches!(self.kind, HandleKind::Dual { .. } | HandleKind::Rock(_))
    }

    #[inline]
    pub fn has_perm(&self, perm: u16) -> bool {
        self.perms & perm != 0
    }

    fn partner_control<'a>(
        &self,
        controls: &'a BTreeMap<u16, Control>,
        handles: &BTreeMap<HandleId, Handle>,
    ) -> Option<&'a Control> {
        if self.is_bot() {
            return None;
        }
        let partner = handles.get(&self.dual?)?;
        controls.get(&partner.control?)
    }

    /// Own score, plus the partner tab's for players and duals.
    pub fn score(&self, controls: &BTreeMap<u16, Control>, handles: &BTreeMap<HandleId, Handle>) -> f64 {
        let own = self.control.and_then(|c| controls.get(&c)).map_or(0.0, |c| c.score);
        own + self.partner_control(controls, handles).map_or(0.0, |c| c.score)
    }

    /// Whether any tab of a player is alive. Other handles only check their own control.
    pub fn is_alive(&self, controls: &BTreeMap<u16, Control>, handles: &BTreeMap<HandleId, Handle>) -> bool {
        let own = self.control.and_then(|c| controls.get(&c)).is_some_and(|c| c.alive);
        own || (self.is_player() && self.partner_control(controls, handles).is_some_and(|c| c.alive))
    }

    /// Perk cells are hidden from and inedible to small or fresh players.
    pub fn can_eat_perk(&self, hide_perks: bool, score: f64, min_perk_size: f64) -> bool {
        if self.is_bot() {
            return false;
        }
        if self.has_perm(perms::TP) || !hide_perks {
            return true;
        }
        self.was_alive && score > min_perk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(id: u16, score: f64, alive: bool) -> Control {
        let mut c = Control::new(id, 4000.0);
        c.score = score;
        c.alive = alive;
        c
    }

    #[test]
    fn test_player_score_includes_dual() {
        let mut controls = BTreeMap::new();
        controls.insert(1, control(1, 100.0, false));
        controls.insert(2, control(2, 50.0, true));

        let mut handles = BTreeMap::new();
        let mut player = Handle::new(HandleKind::Player(Box::default()), 1);
        player.dual = Some(20);
        let mut dual = Handle::new(HandleKind::Dual { owner: 10 }, 2);
        dual.dual = Some(10);
        handles.insert(10, player);
        handles.insert(20, dual);

        let p = &handles[&10];
        assert_eq!(p.score(&controls, &handles), 150.0);
        assert!(p.is_alive(&controls, &handles));
        assert_eq!(handles[&20].score(&controls, &handles), 150.0);
        assert!(handles[&20].is_alive(&controls, &handles));
        assert!(!handles[&20].spectatable());
    }

    #[test]
    fn test_perk_visibility() {
        let mut h = Handle::new(HandleKind::Player(Box::default()), 1);
        assert!(h.can_eat_perk(false, 0.0, 1000.0));
        assert!(!h.can_eat_perk(true, 5000.0, 1000.0));
        h.was_alive = true;
        assert!(!h.can_eat_perk(true, 500.0, 1000.0));
        assert!(h.can_eat_perk(true, 5000.0, 1000.0));
        h.was_alive = false;
        h.perms |= perms::TP;
        assert!(h.can_eat_perk(true, 0.0, 1000.0));

        let bot = Handle::new(HandleKind::Bot(BotBrain::default()), 2);
        assert!(!bot.can_eat_perk(false, 1e9, 0.0));
    }
}
