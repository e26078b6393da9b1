//! Passive spawns and first cells of controls.

use std::sync::Arc;

use rand::Rng;

use super::Engine;
use super::world::World;
use crate::cell::{CellId, kind};
use crate::control::Control;
use crate::geometry::{Boost, Rect};
use crate::handle::Handle;

/// Within this long after a split, a dual tab spawns away from its partner's center.
const SPLIT_AVOID_NANOS: u64 = 1_000_000_000;

/// Index a fresh cell and center the control's view on it.
fn place_first_cell(world: &World, c: &mut Control, x: f64, y: f64, r: f64) {
    let id = world.pool.alloc(c.id, x, y, r);
    let cell = world.pool.get(id);
    cell.update_aabb();
    world.tree.insert(id, cell);
    c.cells.push(id);

    let p = &world.config.player;
    let view = p.view_min * p.view_scale;
    c.viewport = Rect::new(x, y, view, view);
    c.aabb = cell.aabb().to_f64();
}

fn spawn_perk(world: &World, rng: &mut impl Rng, list: &mut Vec<CellId>, max: usize, tag: u16, size: f64, age: f32) {
    if list.len() >= max {
        return;
    }
    let Some((x, y)) = world.safe_spawn_point(rng, size, world.config.spawn.player_safe_radius) else {
        return;
    };
    let id = world.pool.alloc(tag, x, y, size);
    let cell = world.pool.get(id);
    cell.set_age(age);
    cell.update_aabb();
    world.tree.insert(id, cell);
    list.push(id);
}

impl Engine {
    /// Top up pellets, a bounded number per tick.
    pub(super) fn spawn_pellets(&mut self) {
        let Engine { world, rng, .. } = self;
        let pellet = &world.config.pellet;
        for _ in 0..world.config.spawn.max_pellet_per_tick {
            if world.pellets.len() >= pellet.count as usize {
                break;
            }
            let (x, y) = world.random_point(rng, None);
            let id = world.pool.alloc(kind::PELLET, x, y, pellet.size);
            world.pellets.insert(id, world.pool.get(id));
        }
    }

    /// Top up viruses at safe points. A failed search skips the slot.
    pub(super) fn spawn_viruses(&mut self) {
        let Engine { world, rng, viruses, .. } = self;
        let virus = &world.config.virus;
        for _ in 0..world.config.spawn.max_virus_per_tick {
            if viruses.len() >= virus.count as usize {
                break;
            }
            let Some((x, y)) = world.safe_spawn_point(rng, virus.size, world.config.spawn.virus_safe_radius) else {
                continue;
            };
            viruses.push(world.new_virus(x, y, Boost::default()));
        }
    }

    /// One EXP and one CYT cell per perk interval, up to their caps.
    pub(super) fn update_perks(&mut self) {
        let interval = (self.world.config.perk.interval * 1e9) as u64;
        if self.now <= self.last_perk + interval {
            return;
        }
        self.last_perk = self.now;

        let Engine { world, rng, exps, cyts, .. } = self;
        let perk = &world.config.perk;
        spawn_perk(world, rng, exps, perk.max_exp_cells, kind::EXP, perk.exp_size, 25.0);
        spawn_perk(world, rng, cyts, perk.max_cyt_cells, kind::CYT, perk.cyt_size, 5.0);
    }

    /// Serve queued spawn requests. Controls that found no spot stay queued.
    pub(super) fn spawn_players(&mut self) {
        let mode = Arc::clone(&self.mode);
        let pending: Vec<u16> = self.spawn_set.iter().copied().collect();

        for id in pending {
            let handle = self.controls.get(&id).filter(|c| !c.alive).and_then(|c| c.handle);
            let Some(handle) = handle else {
                self.spawn_set.remove(&id);
                continue;
            };

            let spawned = if self.handles.get(&handle).is_some_and(Handle::is_bot) {
                mode.spawn_bot_control(self, id)
            } else {
                mode.spawn_player_control(self, id)
            };
            if spawned {
                let now = self.now;
                if let Some(c) = self.controls.get_mut(&id) {
                    c.alive = true;
                    c.after_spawn(now);
                }
                self.spawn_set.remove(&id);
            }
        }
        self.influences.clear();
    }

    /// Place a bot's first cell away from every live control.
    pub(crate) fn spawn_bot_cell(&mut self, control: u16) -> bool {
        let Engine { world, controls, rng, influences, .. } = self;
        let Some(c) = controls.get_mut(&control) else {
            return false;
        };
        let size = world.config.bot.spawn_size;
        let Some((x, y)) = world.safe_spawn_from(rng, influences, size, world.config.spawn.player_safe_radius) else {
            return false;
        };
        place_first_cell(world, c, x, y, size);
        true
    }

    /// Place a player's first cell, next to its live dual tab if any.
    pub(crate) fn spawn_player_cell(&mut self, control: u16) -> bool {
        let Some(c) = self.controls.get(&control) else {
            return false;
        };
        let spawn_size = self.world.config.player.spawn_size;
        let size = c.overrides.spawn * spawn_size;
        let target = c
            .handle
            .and_then(|h| self.handles.get(&h))
            .and_then(|h| h.dual)
            .and_then(|d| self.handles.get(&d))
            .and_then(|d| d.control)
            .filter(|t| self.controls.get(t).is_some_and(|t| t.alive));

        let Some((x, y)) = self.player_spawn_point(target, size) else {
            return false;
        };
        let Engine { world, controls, .. } = self;
        let Some(c) = controls.get_mut(&control) else {
            return false;
        };
        place_first_cell(world, c, x, y, size);
        c.score = spawn_size * spawn_size * 0.01;
        true
    }

    /// Without a target, two times in three a random live control is picked
    /// as one. Otherwise the influence search runs over the whole map.
    fn player_spawn_point(&mut self, target: Option<u16>, size: f64) -> Option<(f64, f64)> {
        let now = self.now;
        let Engine { world, controls, rng, influences, alive_controls, .. } = self;
        let safe_mul = world.config.spawn.player_safe_radius;

        let (target, avoid_center) = match target {
            Some(t) => {
                let t = controls.get(&t);
                let avoid = t.is_some_and(|t| now.saturating_sub(t.last_split) < SPLIT_AVOID_NANOS);
                (t, avoid)
            }
            None => {
                if alive_controls.is_empty() || rng.random_range(0..3) == 0 {
                    return world.safe_spawn_from(rng, influences, size, safe_mul);
                }
                let pick = alive_controls[rng.random_range(0..alive_controls.len())];
                (controls.get(&pick), false)
            }
        };

        match target {
            Some(t) => world.spawn_near(rng, t, influences, size, avoid_center),
            None => world.safe_spawn_from(rng, influences, size, safe_mul),
        }
    }
}
