//! Per-tick motion, aging, decay and merge eligibility.

use std::f64::consts::{FRAC_1_SQRT_2, TAU};

use rand::Rng;

use super::world::World;
use super::{Engine, job_rng};
use crate::cell::{Cell, CellFlags, kind};
use crate::control::{Control, LineLock};
use crate::geometry::Boost;
use crate::handle::perms;

const AUTOSPLIT_SALT: u64 = 0x5_0000;

/// Tick constants shared by every control job.
struct DecayParams {
    d_mass: f64,
    p_multi: f64,
    camp_nanos: f64,
}

#[inline]
fn age_by(cell: &Cell, dt: f64) {
    cell.set_age(cell.age() + dt as f32);
}

/// Merge threshold in milliseconds of age, and the base time the fast
/// merge rule waits for.
fn merge_time(world: &World, c: &Control, r: f64) -> (f64, f64) {
    let p = &world.config.player;
    if p.merge_time <= 0.0 {
        return (p.no_merge_delay, 0.0);
    }
    let initial = 10000.0 * p.merge_time;
    let increase = 100.0 * r * p.merge_increase;
    let instant = p.ultra_merge || c.overrides.instant;
    let time = if !p.merge_new_ver {
        increase + initial
    } else if instant {
        p.no_colli_delay + p.ultra_merge_delay
    } else {
        increase.max(initial)
    };
    (time, initial)
}

fn update_control(world: &World, c: &mut Control, human: bool, invincible: bool, dt: f64, now: u64, rng: &mut impl Rng, params: &DecayParams) {
    let cfg = &world.config;
    let p = &cfg.player;
    let d = &cfg.decay;

    let mut decay_multi = (c.score - params.d_mass) * params.p_multi;
    if d.anti_camp_time > 0.0 {
        let nosplit = now.saturating_sub(c.last_split) as f64;
        if nosplit > params.camp_nanos && c.score > d.anti_camp_mass {
            let camp = nosplit / 1e9;
            if human {
                decay_multi *= (1.0 + d.anti_camp_mult * camp).min(4.0);
                c.viewport_factor = (1.0 - d.anti_camp_mult * camp).max(0.0);
            }
        } else {
            c.viewport_factor = 1.0;
        }
    }

    if c.overrides.cells > 0 && c.cells.len() > c.overrides.cells as usize {
        for id in c.cells.drain(c.overrides.cells as usize..) {
            world.tree.remove(id, world.pool.get(id));
            world.pool.free(id);
        }
    }

    let o = &c.overrides;
    let static_decay = d.static_rate * 0.01;
    let locked = c.line_lock.is_locked();
    let mut seen = CellFlags::empty();
    let mut split_off = Vec::new();

    for &id in &c.cells {
        let cell = world.pool.get(id);
        age_by(cell, dt);
        cell.retain_flags(CellFlags::CLEAR);
        world.boost(cell, dt);
        world.bounce(cell);

        let age = f64::from(cell.age());
        let mut r = cell.r();
        if r > d.min_radius && age > p.no_colli_delay {
            r -= o.decay * decay_multi * r * static_decay * dt * 0.0001;
        }
        r = r.clamp(o.min_size, o.max_size);
        cell.set_r(r);

        if o.can_colli && age > p.no_colli_delay {
            cell.add_flags(CellFlags::COLL);
        }
        if invincible {
            cell.add_flags(CellFlags::NOEAT);
        }

        if p.autosplit_size > 0.0 && o.can_auto && r > p.autosplit_size {
            let angle = rng.random_range(0.0..TAU);
            let boost = Boost::new(angle.sin(), angle.cos(), p.split_boost);
            split_off.push(world.split_from(id, r * FRAC_1_SQRT_2, boost));
        }

        let r = cell.r();
        let (time, initial) = merge_time(world, c, r);
        let fast = cfg.eat.fast_merge_mass > 0.0
            && r < p.min_eject_size
            && c.score > cfg.eat.fast_merge_mass
            && age > initial;
        if o.can_merge && (age > time || fast) {
            cell.add_flags(CellFlags::MERGE);
        }

        world.move_cell(cell, dt, c.mouse, o.speed, locked, &mut seen);
        cell.update_aabb();
        world.tree.update(id, cell);
    }
    c.cells.extend(split_off);

    if c.line_lock == LineLock::Free && seen.contains(CellFlags::WALL) {
        c.unlock_line();
    }
}

impl Engine {
    /// Free the cells resolve marked last tick.
    pub(super) fn remove_cells(&mut self) {
        let world = &self.world;
        for id in self.removed.drain(..) {
            let cell = world.pool.get(id);
            let tag = cell.tag();
            if tag == kind::VIRUS || tag & kind::EJECT_BIT != 0 {
                world.hazards.remove(id, cell);
            } else if tag == kind::PELLET {
                world.pellets.remove(id, cell);
            }
            world.pool.free(id);
        }
    }

    pub(super) fn update_cells(&mut self, dt: f64) {
        self.remove_cells();

        let world = &self.world;
        let eject = &world.config.eject;

        for &id in self.exps.iter().chain(&self.cyts) {
            let cell = world.pool.get(id);
            if world.boost(cell, dt) {
                world.bounce(cell);
                let mut b = cell.boost();
                b.d = eject.boost;
                cell.set_boost(b);
                cell.update_aabb();
                world.tree.update(id, cell);
            }
        }

        for &id in &self.ejected {
            let cell = world.pool.get(id);
            age_by(cell, dt);
            cell.retain_flags(CellFlags::CLEAR);
            if eject.max_age > 0.0 && f64::from(cell.age()) > eject.max_age {
                cell.add_flags(CellFlags::REMOVE);
            }
            if world.boost(cell, dt) {
                world.bounce(cell);
                world.hazards.update(id, cell);
            }
        }

        for &id in &self.dead {
            let cell = world.pool.get(id);
            age_by(cell, dt);
            cell.retain_flags(CellFlags::CLEAR);
            if world.boost(cell, dt) {
                world.bounce(cell);
                cell.update_aabb();
                world.tree.update(id, cell);
            }
        }

        for &id in &self.viruses {
            let cell = world.pool.get(id);
            age_by(cell, dt);
            cell.retain_flags(CellFlags::CLEAR);
            if world.boost(cell, dt) {
                world.bounce(cell);
                world.hazards.update(id, cell);
            }
        }

        if !self.ignore_input {
            self.update_controls(dt);
        }
        self.world.tree.restructure(&self.world.pool);
    }

    fn update_controls(&mut self, dt: f64) {
        let (seed, tick, now) = (self.seed, self.tick_count, self.now);
        let Engine { world, controls, handles, workers, player_mass, .. } = self;
        let world = &*world;
        let d = &world.config.decay;

        let map_mass = world.map.hw * world.map.hh * 0.04;
        let params = DecayParams {
            d_mass: 0.01 * d.min_radius * d.min_radius,
            p_multi: 0.00001 * d.local_rate * (1.0 + *player_mass / map_mass * d.global_rate),
            camp_nanos: d.anti_camp_time * 1e9,
        };

        let items: Vec<(&mut Control, bool, bool)> = controls
            .values_mut()
            .filter(|c| c.alive)
            .map(|c| {
                let h = c.handle.and_then(|h| handles.get(&h));
                let human = h.is_some_and(|h| !h.is_bot());
                let invincible = h.is_some_and(|h| h.has_perm(perms::INVINCIBLE));
                (c, human, invincible)
            })
            .collect();

        workers.for_each(items, |(c, human, invincible)| {
            let mut rng = job_rng(seed, tick, AUTOSPLIT_SALT | u64::from(c.id));
            update_control(world, c, human, invincible, dt, now, &mut rng, &params);
        });
    }
}
