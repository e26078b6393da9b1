//! Rockslide game mode.
//!
//! Rocks roll across the map from the side walls. Players start at the
//! bottom edge, cannot eat and do not decay; touching the goal at the top
//! wins the round.

use std::collections::BTreeSet;
use std::sync::Mutex;

use rand::Rng;
use tracing::info;

use super::GameMode;
use crate::bot::RockBrain;
use crate::cell::{CellId, kind};
use crate::config::ModeConfig;
use crate::control::Control;
use crate::engine::{Engine, WinEvent};
use crate::geometry::{Point, Rect};
use crate::handle::{HandleId, HandleKind, perms};
use crate::lock;

const ROCK_COUNT: usize = 40;
const ROCK_RADIUS: f64 = 1000.0;
const PLAYER_RADIUS: f64 = 1000.0;
const GOAL_RADIUS: f64 = 1000.0;

pub struct Rockslide {
    /// The goal cell. It lives in the pool but in no index.
    goal: Mutex<Option<CellId>>,
}

impl Rockslide {
    pub fn new() -> Self {
        Self { goal: Mutex::new(None) }
    }

    pub fn goal(&self) -> Option<CellId> {
        *lock(&self.goal)
    }
}

impl Default for Rockslide {
    fn default() -> Self {
        Self::new()
    }
}

/// Give a rock a fresh speed and minimum size.
fn roll(control: &mut Control, rng: &mut impl Rng) {
    control.overrides.speed = rng.random_range(10.0..=20.0);
    control.overrides.min_size = rng.random_range(500.0..=1500.0);
}

impl GameMode for Rockslide {
    fn name(&self) -> &str {
        "rockslide"
    }

    fn hides_perks(&self) -> bool {
        false
    }

    fn dual_enabled(&self, _config: &ModeConfig) -> bool {
        false
    }

    fn spawns_viruses(&self) -> bool {
        false
    }

    fn spawns_perks(&self) -> bool {
        false
    }

    fn restores_state(&self) -> bool {
        false
    }

    fn delay_kill_replaces(&self, _replace: bool) -> bool {
        false
    }

    fn on_restart(&self, engine: &mut Engine) {
        let world = &engine.world;
        let id = world.pool.alloc(kind::CYT, 0.0, world.map.hh * 0.9, GOAL_RADIUS);
        world.pool.get(id).update_aabb();
        *lock(&self.goal) = Some(id);
    }

    fn on_handle_added(&self, engine: &mut Engine, handle: HandleId) {
        let Some(h) = engine.handles.get_mut(&handle) else {
            return;
        };
        if h.is_bot() {
            return;
        }
        h.perms |= perms::NO_EAT;
        if let Some(c) = h.control.and_then(|id| engine.controls.get_mut(&id)) {
            c.overrides.decay = 0.0;
        }
    }

    fn create_bot(&self, engine: &mut Engine, control: Option<u16>) -> HandleId {
        let handle = engine.insert_bot(HandleKind::Rock(RockBrain), control.unwrap_or(1));
        let Engine { handles, controls, rng, .. } = engine;
        if let Some(c) = handles.get(&handle).and_then(|h| h.control).and_then(|id| controls.get_mut(&id)) {
            roll(c, rng);
            let o = &mut c.overrides;
            o.cells = 1;
            o.can_auto = false;
            o.can_merge = false;
            o.can_colli = false;
            o.can_eat_pellet = false;
        }
        handle
    }

    fn spawn_bots(&self, engine: &mut Engine) {
        if engine.bots().len() < ROCK_COUNT {
            self.create_bot(engine, None);
        }
        if engine.bots().len() > ROCK_COUNT {
            if let Some(&last) = engine.bots().last() {
                engine.remove_handle(last);
            }
        }
    }

    fn spawn_bot_control(&self, engine: &mut Engine, control: u16) -> bool {
        let Engine { world, controls, rng, .. } = engine;
        let Some(c) = controls.get_mut(&control) else {
            return false;
        };
        let (hw, hh) = (world.map.hw, world.map.hh);
        let x = if rng.random_bool(0.5) { hw } else { -hw };
        let y = rng.random_range(-0.75 * hh..=0.75 * hh);
        let target = rng.random_range(-0.75 * hh..=0.75 * hh);
        c.mouse = Point::new(-x, target);
        roll(c, rng);
        c.overrides.cells = 1;

        let id = world.pool.alloc(kind::ROCK, x, y, ROCK_RADIUS);
        let cell = world.pool.get(id);
        cell.update_aabb();
        world.tree.insert(id, cell);
        c.cells.push(id);
        c.viewport = Rect::new(x, y, ROCK_RADIUS, ROCK_RADIUS);
        c.aabb = cell.aabb().to_f64();
        true
    }

    fn spawn_player_control(&self, engine: &mut Engine, control: u16) -> bool {
        let Engine { world, controls, rng, .. } = engine;
        let Some(c) = controls.get_mut(&control) else {
            return false;
        };
        let (hw, hh) = (world.map.hw, world.map.hh);
        let x = rng.random_range(-0.8 * hw..=0.8 * hw);
        let y = -0.9 * hh;

        let id = world.pool.alloc(control, x, y, PLAYER_RADIUS);
        let cell = world.pool.get(id);
        cell.update_aabb();
        world.tree.insert(id, cell);
        c.cells.push(id);
        let view = world.config.player.view_min * world.config.player.view_scale;
        c.viewport = Rect::new(x, y, view, view);
        c.aabb = cell.aabb().to_f64();
        c.overrides.max_size = PLAYER_RADIUS;
        true
    }

    fn post_resolve(&self, engine: &mut Engine) -> Vec<WinEvent> {
        let Some(goal) = self.goal() else {
            return Vec::new();
        };

        let world = &engine.world;
        let g = world.pool.get(goal);
        let mut touching = BTreeSet::new();
        world.tree.query(goal, g, false, |other, _| {
            let o = world.pool.get(other);
            let (dx, dy) = (o.x() - g.x(), o.y() - g.y());
            let sum = o.r() + g.r();
            if dx * dx + dy * dy < sum * sum {
                touching.insert(o.tag());
            }
        });

        let mut events = Vec::new();
        for tag in touching {
            let Some(handle) = engine.controls.get(&tag).and_then(|c| c.handle) else {
                continue;
            };
            let Some(h) = engine.handles.get(&handle) else {
                continue;
            };
            if h.is_bot() || h.has_perm(perms::TP) {
                continue;
            }
            engine.delay_kill(tag, false);
            info!("Handle {} reached the goal", handle);
            events.push(WinEvent { handle, control: tag });
        }
        events
    }

    fn extra_visible(&self) -> Option<CellId> {
        self.goal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rock_engine() -> (Engine, Rockslide) {
        let config = ModeConfig::preset("rockslide").unwrap();
        let mut e = Engine::new(config, 0, Some(3)).unwrap();
        let mode = Rockslide::new();
        mode.on_restart(&mut e);
        (e, mode)
    }

    fn place_near_goal(e: &mut Engine, mode: &Rockslide, control: u16) {
        let g = e.world.pool.get(mode.goal().unwrap());
        let (x, y) = (g.x(), g.y() - 1500.0);
        let id = e.world.pool.alloc(control, x, y, PLAYER_RADIUS);
        let cell = e.world.pool.get(id);
        cell.update_aabb();
        e.world.tree.insert(id, cell);
        let c = e.controls.get_mut(&control).unwrap();
        c.cells.push(id);
        c.alive = true;
    }

    #[test]
    fn test_goal_sits_near_top() {
        let (e, mode) = rock_engine();
        let g = e.world.pool.get(mode.goal().unwrap());
        assert_eq!(g.tag(), kind::CYT);
        assert!((g.y() - e.world.map.hh * 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_player_reaching_goal_wins() {
        let (mut e, mode) = rock_engine();
        let h = e.add_player();
        let cid = e.handles[&h].control.unwrap();
        assert!(e.handles[&h].has_perm(perms::NO_EAT));
        place_near_goal(&mut e, &mode, cid);

        let events = mode.post_resolve(&mut e);
        assert_eq!(events, vec![WinEvent { handle: h, control: cid }]);
    }

    #[test]
    fn test_rocks_do_not_win() {
        let (mut e, mode) = rock_engine();
        let h = mode.create_bot(&mut e, None);
        let cid = e.handles[&h].control.unwrap();
        assert_eq!(e.controls[&cid].overrides.cells, 1);
        place_near_goal(&mut e, &mode, cid);
        assert!(mode.post_resolve(&mut e).is_empty());
    }

    #[test]
    fn test_players_spawn_at_bottom() {
        let (mut e, mode) = rock_engine();
        let h = e.add_player();
        let cid = e.handles[&h].control.unwrap();
        assert!(mode.spawn_player_control(&mut e, cid));
        let c = &e.controls[&cid];
        let cell = e.world.pool.get(c.cells[0]);
        assert!((cell.y() + 0.9 * e.world.map.hh).abs() < 1e-6);
        assert_eq!(c.overrides.max_size, PLAYER_RADIUS);
    }

    #[test]
    fn test_rocks_spawn_on_side_walls() {
        let (mut e, mode) = rock_engine();
        let h = mode.create_bot(&mut e, None);
        let cid = e.handles[&h].control.unwrap();
        assert!(mode.spawn_bot_control(&mut e, cid));
        let c = &e.controls[&cid];
        let cell = e.world.pool.get(c.cells[0]);
        assert_eq!(cell.tag(), kind::ROCK);
        assert!((cell.x().abs() - e.world.map.hw).abs() < 1e-6);
        assert!(c.mouse.x * cell.x() < 0.0);
        assert!((10.0..=20.0).contains(&c.overrides.speed));
    }
}
