//! Collision, merge and eat settlement.
//!
//! Resolve runs as a strict sequence of passes. Passes 0, 1, 3, 4 and 5 are
//! dispatched per control to the worker pool; the rest run on the tick
//! thread. A control's cells are visited largest first, so an eater that
//! grows mid-pass keeps growing from its current radius.
//!
//! Cells owned by different controls race only on the victim's flag word.
//! The eater claims a victim with a compare-and-swap (or `fetch_or` for
//! pellets), so exactly one of any number of contenders gets its mass.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::ops::ControlFlow;
use std::time::Instant;

use rand::Rng;

use super::diagnostics::QueryStats;
use super::world::World;
use super::{Engine, job_rng, lap};
use crate::cell::{Cell, CellFlags, CellId, kind};
use crate::control::Control;
use crate::geometry::Boost;
use crate::handle::{HandleId, Perks, perms};
use crate::pool::CellPool;

const POP_SALT: u64 = 0x6_0000;

/// What a control may do in the cross-owner passes.
#[derive(Debug, Clone, Copy, Default)]
struct Eater {
    handle: Option<HandleId>,
    no_eat: bool,
    no_pop: bool,
    eat_perk: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Action {
    Collide,
    Merge,
}

/// Split `mass` into pieces for at most `left` new cells, none smaller than
/// `min`. The pieces never add up to the whole mass.
pub(crate) fn distribute_mass(left: f64, mass: f64, min: f64, monotone: bool) -> Vec<f64> {
    if left <= 0.0 {
        return Vec::new();
    }

    if monotone {
        let amount = (mass / min).floor().min(left).max(0.0) as usize;
        let per = mass / (amount as f64 + 1.0);
        return vec![per; amount];
    }

    if mass / left < min {
        let mut amount = 2usize;
        while mass / (amount as f64 + 1.0) >= min && (amount * 2) as f64 <= left {
            amount *= 2;
        }
        return vec![mass / (amount as f64 + 1.0); amount];
    }

    let mut pieces = Vec::new();
    let mut left = left;
    let mut next = mass * 0.5;
    let mut mass_left = next;
    while left > 0.0 {
        if next / left < min {
            break;
        }
        while next >= mass_left && left > 1.0 {
            next *= 0.5;
        }
        pieces.push(next);
        mass_left -= next;
        left -= 1.0;
    }
    if left > 0.0 {
        let per = mass_left / left;
        pieces.extend(std::iter::repeat_n(per, left as usize));
    }
    pieces
}

/// Push two overlapping cells apart, each by the other's share of the
/// combined area. `(x, y)` is the first cell's position, updated in place.
fn push_apart(x: &mut f64, y: &mut f64, r: f64, other: &Cell, d: f64) {
    let r2 = other.r();
    let m = r + r2 - d;
    let (dx, dy) = ((other.x() - *x) / d, (other.y() - *y) / d);
    let (a, b) = (r * r, r2 * r2);
    let sum = a + b;

    let m1 = m.min(r) * b / sum;
    *x -= dx * m1;
    *y -= dy * m1;
    let m2 = m.min(r2) * a / sum;
    other.set_pos(other.x() + dx * m2, other.y() + dy * m2);
}

/// Distance from `(x, y)` to `other` when the circles overlap.
#[inline]
fn overlap(x: f64, y: f64, r: f64, other: &Cell) -> Option<f64> {
    let (dx, dy) = (other.x() - x, other.y() - y);
    let sum = r + other.r();
    let d_sqr = dx * dx + dy * dy;
    if d_sqr == 0.0 || d_sqr >= sum * sum { None } else { Some(d_sqr.sqrt()) }
}

/// Pass 0: same-owner push-apart and merging.
fn resolve_own(world: &World, c: &mut Control, stats: &mut QueryStats) {
    let pool = &world.pool;
    c.sorted.clone_from(&c.cells);
    c.sorted.sort_by(|&a, &b| pool.get(b).r().total_cmp(&pool.get(a).r()));

    let o = &c.overrides;
    if !o.can_merge && !o.can_colli {
        return;
    }
    let ultra = world.config.player.ultra_merge;
    let eat_overlap = world.config.eat.overlap;

    for &id in &c.sorted {
        let cell = pool.get(id);
        if cell.flags().intersects(CellFlags::SKIP_RESOLVE) {
            continue;
        }
        let tag = cell.tag();

        world.tree.query(id, cell, true, |oid, level| {
            stats.visit(level);
            let other = pool.get(oid);
            let of = other.flags();
            if of.intersects(CellFlags::SKIP_RESOLVE) || other.tag() != tag {
                return;
            }
            let r = cell.r();
            let r2 = other.r();
            if r < r2 {
                return;
            }

            let flags = cell.flags();
            let both = flags & of;
            let either = flags | of;
            let action = if both.contains(CellFlags::MERGE) {
                Action::Merge
            } else if (if ultra { either } else { both }).contains(CellFlags::COLL) {
                Action::Collide
            } else {
                return;
            };

            let Some(d) = overlap(cell.x(), cell.y(), r, other) else {
                return;
            };
            stats.hit(level);

            match action {
                Action::Collide => {
                    if d + r2 < r {
                        other.add_flags(CellFlags::INSIDE);
                    }
                    let (mut x, mut y) = (cell.x(), cell.y());
                    push_apart(&mut x, &mut y, r, other, d);
                    cell.set_pos(x, y);
                    cell.add_flags(CellFlags::UPDATE);
                    other.add_flags(CellFlags::UPDATE);
                }
                Action::Merge => {
                    if d >= r - r2 / eat_overlap {
                        return;
                    }
                    cell.set_r((r * r + r2 * r2).sqrt());
                    other.set_eaten_by(id);
                    cell.add_flags(CellFlags::UPDATE);
                    other.add_flags(CellFlags::REMOVE);
                }
            }
        });
    }
}

/// Pass 1: eating tree cells of other owners, perks included.
fn resolve_eat(world: &World, c: &Control, eater: Eater, stats: &mut QueryStats, perks: &mut Perks) {
    if eater.handle.is_none() || eater.no_eat {
        return;
    }
    let pool = &world.pool;
    let eat = &world.config.eat;

    for &id in &c.sorted {
        let cell = pool.get(id);
        if cell.flags().intersects(CellFlags::SKIP_RESOLVE) {
            continue;
        }
        let tag = cell.tag();

        world.tree.query(id, cell, true, |oid, _| {
            stats.phase1.total += 1;
            let other = pool.get(oid);
            let of = other.flags();
            let otag = other.tag();
            if of.intersects(CellFlags::SKIP_RESOLVE) || otag == tag {
                return;
            }
            if kind::is_perk(otag) && !eater.eat_perk {
                return;
            }
            let r = cell.r();
            let r2 = other.r();
            if r < r2 || r < r2 * eat.mult {
                return;
            }
            if !cell.flags().contains(CellFlags::NOEAT) && of.contains(CellFlags::NOEAT) {
                return;
            }

            let Some(d) = overlap(cell.x(), cell.y(), r, other) else {
                return;
            };
            stats.phase1.effective += 1;
            if d >= r - r2 / eat.overlap || cell.flags().intersects(CellFlags::SKIP_RESOLVE) {
                return;
            }
            if !other.cas_flags(of, of | CellFlags::REMOVE) {
                return;
            }
            other.set_eaten_by(id);

            let weight = other.age() as u16;
            match otag {
                kind::EXP => perks.exps = perks.exps.saturating_add(weight),
                kind::CYT => perks.cyts = perks.cyts.saturating_add(weight),
                _ => {
                    cell.set_r((r * r + r2 * r2).sqrt());
                    cell.add_flags(CellFlags::UPDATE);
                }
            }
        });
    }
}

/// Fold an eaten ejected cell's boost into the eater's.
fn absorb_boost(world: &World, cell: &Cell, other: &Cell) {
    let cfg = &world.config;
    let max = cfg.player.max_boost;
    let mut b = cell.boost();
    let ob = other.boost();

    if cfg.boost.new_algo {
        if b.d > max {
            return;
        }
        let (bx, by) = (b.x * b.d + ob.x * cfg.boost.amount, b.y * b.d + ob.y * cfg.boost.amount);
        let d = bx.hypot(by);
        if d <= 0.0 {
            return;
        }
        b = Boost::new(bx / d, by / d, d);
    } else {
        let ratio = other.r() / (cell.r() + 100.0);
        b.d = (b.d + ratio * 0.025 * ob.d).min(max);
        let (bx, by) = (b.x + ratio * 0.02 * ob.x, b.y + ratio * 0.02 * ob.y);
        let norm = bx.hypot(by);
        if norm > 0.0 {
            b.x = bx / norm;
            b.y = by / norm;
        }
    }
    cell.set_boost(b);
}

/// Pass 3: eating ejected cells and viruses.
fn resolve_hazards(world: &World, c: &Control, eater: Eater) {
    if eater.handle.is_none() {
        return;
    }
    let pool = &world.pool;
    let eat = &world.config.eat;

    for &id in &c.sorted {
        let cell = pool.get(id);
        if cell.flags().intersects(CellFlags::SKIP_RESOLVE) {
            continue;
        }
        let tag = cell.tag();

        world.hazards.query(&cell.aabb().to_f64(), |oid| {
            let other = pool.get(oid);
            let otag = other.tag();
            if eater.no_eat && otag & kind::PELLET != tag {
                return ControlFlow::Continue(());
            }
            let of = other.flags();
            if of.contains(CellFlags::REMOVE) {
                return ControlFlow::Continue(());
            }
            let (r, r2) = (cell.r(), other.r());
            let d = (other.x() - cell.x()).hypot(other.y() - cell.y());
            if r <= r2 * eat.mult || d >= r - r2 / eat.overlap {
                return ControlFlow::Continue(());
            }
            if !other.cas_flags(of, of | CellFlags::REMOVE) {
                return ControlFlow::Break(());
            }
            cell.set_r((r * r + r2 * r2).sqrt());

            if otag == kind::VIRUS {
                cell.add_flags(CellFlags::UPDATE | CellFlags::POP);
                return ControlFlow::Break(());
            }
            absorb_boost(world, cell, other);
            cell.add_flags(CellFlags::UPDATE);
            other.set_eaten_by(id);
            ControlFlow::Continue(())
        });
    }
}

/// Pass 4: pellets. Claimed pellets are appended to `removed`.
fn resolve_pellets(world: &World, c: &Control, removed: &mut Vec<CellId>) {
    if !c.overrides.can_eat_pellet {
        return;
    }
    let pool = &world.pool;
    let eat = &world.config.eat;

    for &id in &c.sorted {
        let cell = pool.get(id);
        if cell.flags().intersects(CellFlags::SKIP_RESOLVE) {
            continue;
        }
        let (x, y) = (cell.x(), cell.y());
        let mut r = cell.r();

        world.pellets.query(&cell.aabb().to_f64(), |pid| {
            let pellet = pool.get(pid);
            if pellet.flags().contains(CellFlags::REMOVE) {
                return ControlFlow::Continue(());
            }
            let r2 = pellet.r();
            let d = (pellet.x() - x).hypot(pellet.y() - y);
            if r > r2 * eat.mult && d < r - r2 / eat.overlap && pellet.try_claim(CellFlags::REMOVE) {
                r = (r * r + r2 * r2).sqrt();
                pellet.set_eaten_by(id);
                cell.add_flags(CellFlags::UPDATE);
                removed.push(pid);
            }
            ControlFlow::Continue(())
        });
        cell.set_r(r);
    }
}

/// Pass 5: virus pops, line projection, reindexing and removal of eaten
/// cells. Eaten cells go to `removed`.
fn settle(world: &World, c: &mut Control, eater: Eater, now: u64, rng: &mut impl Rng, removed: &mut Vec<CellId>) {
    let p = &world.config.player;
    let pool = &world.pool;
    let no_pop = eater.no_pop || c.overrides.cells == 1;
    let max_cells = c.overrides.max_cells(p.max_cells);
    let min_split = p.min_split_size * p.min_split_size * 0.01;

    let sorted = std::mem::take(&mut c.sorted);
    for &id in &sorted {
        let cell = pool.get(id);
        let f = cell.flags();
        if f.contains(CellFlags::REMOVE) {
            continue;
        }
        if f.contains(CellFlags::POP) && !no_pop {
            let left = max_cells as f64 - c.cells.len() as f64;
            let mass = cell.r() * cell.r() * 0.01;
            for piece in distribute_mass(left, mass, min_split, world.config.virus.monotone_pop) {
                let angle = rng.random_range(0.0..TAU);
                let boost = Boost::new(angle.sin(), angle.cos(), p.split_boost);
                c.cells.push(world.split_from(id, (piece * 100.0).sqrt(), boost));
            }
            c.last_popped = now;
        }
        if cell.flags().contains(CellFlags::LOCK) {
            let (x, y) = c.project(cell.x(), cell.y());
            cell.set_pos(x, y);
        }
        cell.update_aabb();
        world.tree.update(id, cell);
    }
    c.sorted = sorted;

    c.cells.retain(|&id| {
        let gone = pool.get(id).flags().contains(CellFlags::REMOVE);
        if gone {
            removed.push(id);
        }
        !gone
    });
    let was_alive = c.alive;
    c.alive = !c.cells.is_empty();
    if was_alive && !c.alive {
        c.last_dead = now;
    }
}

/// Reborrow the active controls for one more pass.
fn batch<'a>(active: &'a mut [(&mut Control, Eater)]) -> Vec<(&'a mut Control, Eater)> {
    active.iter_mut().map(|(c, e)| (&mut **c, *e)).collect()
}

/// Move cells flagged `REMOVE` from `list` to `removed`.
fn filter_removed(pool: &CellPool, list: &mut Vec<CellId>, removed: &mut Vec<CellId>) {
    list.retain(|&id| {
        let gone = pool.get(id).flags().contains(CellFlags::REMOVE);
        if gone {
            removed.push(id);
        }
        !gone
    });
}

impl Engine {
    fn eaters(&self) -> BTreeMap<u16, Eater> {
        let min_perk = self.world.config.perk.min_perk_size;
        self.controls
            .values()
            .filter(|c| !c.cells.is_empty())
            .map(|c| {
                let eater = c.handle.and_then(|id| self.handles.get(&id).map(|h| (id, h))).map_or(
                    Eater::default(),
                    |(id, h)| Eater {
                        handle: Some(id),
                        no_eat: h.has_perm(perms::NO_EAT),
                        no_pop: h.has_perm(perms::NO_POP),
                        eat_perk: h.can_eat_perk(self.hide_perks, h.score(&self.controls, &self.handles), min_perk),
                    },
                );
                (c.id, eater)
            })
            .collect()
    }

    pub(super) fn resolve(&mut self) {
        let mut t = Instant::now();
        let (seed, tick, now) = (self.seed, self.tick_count, self.now);
        let eaters = self.eaters();

        let Engine { world, controls, handles, workers, dead, ejected, removed, virus_to_split, queries, timings, .. } =
            self;
        let world = &*world;
        let pool = &world.pool;
        *queries = QueryStats::default();

        let mut active: Vec<(&mut Control, Eater)> = controls
            .values_mut()
            .filter_map(|c| {
                let e = *eaters.get(&c.id)?;
                Some((c, e))
            })
            .collect();
        active.sort_by(|a, b| b.0.score.total_cmp(&a.0.score));

        let stats = workers.run(batch(&mut active), QueryStats::default, |s, (c, _)| resolve_own(world, c, s));
        for s in &stats {
            queries.merge(s);
        }
        timings.physics[0] = lap(&mut t);

        let outs = workers.run(
            batch(&mut active),
            || (QueryStats::default(), Vec::new()),
            |(s, perks), (c, e)| {
                let mut p = Perks::default();
                resolve_eat(world, c, e, s, &mut p);
                if let Some(h) = e.handle.filter(|_| p.updated()) {
                    perks.push((h, p));
                }
            },
        );
        for (s, perks) in outs {
            queries.merge(&s);
            for (h, p) in perks {
                if let Some(h) = handles.get_mut(&h) {
                    h.perks.merge(p);
                }
            }
        }
        timings.physics[1] = lap(&mut t);

        let dead_delay = world.config.player.dead_delay;
        for &id in dead.iter() {
            let cell = pool.get(id);
            if f64::from(cell.age()) > dead_delay {
                cell.add_flags(CellFlags::REMOVE);
                continue;
            }
            if cell.flags().intersects(CellFlags::SKIP_RESOLVE) {
                continue;
            }
            let (mut x, mut y, r) = (cell.x(), cell.y(), cell.r());
            world.tree.query(id, cell, true, |oid, _| {
                let other = pool.get(oid);
                if other.flags().intersects(CellFlags::SKIP_RESOLVE) || other.tag() != kind::DEAD {
                    return;
                }
                let r2 = other.r();
                if r < r2 {
                    return;
                }
                let Some(d) = overlap(x, y, r, other) else {
                    return;
                };
                if d + r2 < r {
                    other.add_flags(CellFlags::INSIDE);
                }
                push_apart(&mut x, &mut y, r, other, d);
                cell.add_flags(CellFlags::UPDATE);
                other.add_flags(CellFlags::UPDATE);
            });
            cell.set_pos(x, y);
        }
        timings.physics[2] = lap(&mut t);

        workers.for_each(batch(&mut active), |(c, e)| resolve_hazards(world, c, e));
        timings.physics[3] = lap(&mut t);

        let eaten = workers.run(batch(&mut active), Vec::new, |out, (c, _)| resolve_pellets(world, c, out));
        for out in eaten {
            removed.extend(out);
        }
        timings.physics[4] = lap(&mut t);

        let gone = workers.run(batch(&mut active), Vec::new, |out, (c, e)| {
            let mut rng = job_rng(seed, tick, POP_SALT | u64::from(c.id));
            settle(world, c, e, now, &mut rng, out);
        });
        for out in gone {
            removed.extend(out);
        }
        for &id in dead.iter() {
            let cell = pool.get(id);
            let f = cell.flags();
            if !f.contains(CellFlags::REMOVE) && f.contains(CellFlags::UPDATE) {
                cell.update_aabb();
                world.tree.update(id, cell);
            }
        }
        timings.physics[5] = lap(&mut t);

        for &id in ejected.iter() {
            resolve_ejected(world, id, virus_to_split);
        }
        timings.physics[6] = lap(&mut t);
    }

    /// Materialize virus splits, restructure the tree and compact the
    /// cell lists.
    pub(super) fn post_resolve(&mut self) {
        let mut t = Instant::now();
        let Engine { world, rng, viruses, virus_to_split, exps, cyts, ejected, dead, removed, timings, .. } = self;
        let v = &world.config.virus;

        for id in virus_to_split.drain(..) {
            let virus = world.pool.get(id);
            let (x, y) = (virus.x(), virus.y());
            if v.split_boost > 0.0 {
                let b = virus.boost();
                let angle = b.x.atan2(b.y);
                virus.set_r(v.size);
                viruses.push(world.new_virus(x, y, Boost::new(angle.sin(), angle.cos(), v.split_boost)));
            } else if v.explode {
                let pieces = ((v.max_size * v.max_size) / (v.size * v.size)) as usize;
                for _ in 0..pieces {
                    let angle = rng.random_range(0.0..TAU);
                    let d = rng.random_range(5.0..20.0) * v.split_boost;
                    viruses.push(world.new_virus(x, y, Boost::new(angle.sin(), angle.cos(), d)));
                }
                virus.set_r(v.size);
            }
        }

        world.tree.restructure(&world.pool);
        for list in [exps, cyts, ejected, viruses, dead] {
            filter_removed(&world.pool, list, removed);
        }
        timings.physics[7] = lap(&mut t);
    }
}

/// Pass 6: a moving ejected cell pushes other ejected cells and feeds
/// viruses. A fed virus is queued in `to_split` once per threshold it
/// passes, so it can split more than once per tick.
fn resolve_ejected(world: &World, id: CellId, to_split: &mut Vec<CellId>) {
    let pool = &world.pool;
    let e = pool.get(id);
    let f = e.flags();
    if !f.contains(CellFlags::UPDATE) || f.contains(CellFlags::REMOVE) {
        return;
    }
    let cfg = &world.config;
    let v = &cfg.virus;
    let (mut x, mut y, r) = (e.x(), e.y(), e.r());

    world.hazards.query_around(id, e, |oid| {
        let other = pool.get(oid);
        if other.flags().contains(CellFlags::REMOVE) {
            return ControlFlow::Continue(());
        }
        let Some(d) = overlap(x, y, r, other) else {
            return ControlFlow::Continue(());
        };
        let r2 = other.r();

        if other.tag() != kind::VIRUS {
            push_apart(&mut x, &mut y, r, other, d);
            world.hazards.update(oid, other);
            e.add_flags(CellFlags::UPDATE);
            other.add_flags(CellFlags::UPDATE);
            return ControlFlow::Continue(());
        }
        if r * cfg.eat.mult >= r2 || d >= r2 - r / cfg.eat.overlap {
            return ControlFlow::Continue(());
        }

        other.set_r((r * r + r2 * r2).sqrt());
        let eb = e.boost();
        let mut vb = other.boost();
        let mut queue = |vb: &mut Boost| {
            to_split.push(oid);
            vb.x = eb.x;
            vb.y = eb.y;
        };
        if v.max_size > 0.0 && other.r() > v.max_size {
            if v.explode {
                queue(&mut vb);
            } else {
                other.set_r(v.max_size);
            }
        }
        if v.split_size > 0.0 && other.r() > v.split_size {
            queue(&mut vb);
        }
        if v.push_boost > 0.0 {
            let (bx, by) = (vb.x * vb.d + eb.x * eb.d, vb.y * vb.d + eb.y * eb.d);
            let norm = bx.hypot(by);
            if norm > 0.0 {
                vb = Boost::new(bx / norm, by / norm, (eb.d + vb.d).min(v.max_boost));
            }
        }
        other.set_boost(vb);

        e.add_flags(CellFlags::REMOVE);
        other.add_flags(CellFlags::UPDATE);
        ControlFlow::Break(())
    });

    e.set_pos(x, y);
    world.hazards.update(id, e);
}

#[cfg(test)]
mod tests {
    use super::super::tests::{bot, place, quiet_engine};
    use super::*;

    fn engine_with_workers(workers: usize) -> Engine {
        let mut config = crate::ModeConfig::preset("ffa").unwrap();
        config.world.map_hw = 5000.0;
        config.world.map_hh = 5000.0;
        config.world.cell_limit = 4096;
        config.world.grid_pellet_size = 16;
        config.world.grid_hazard_size = 16;
        config.pellet.count = 0;
        config.virus.count = 0;
        config.bot.count = 0;
        config.perk.max_cyt_cells = 0;
        config.perk.max_exp_cells = 0;
        let mut e = Engine::new(config, workers, Some(11)).unwrap();
        e.set_update_bot(false);
        e.start();
        e
    }

    #[test]
    fn test_distribute_mass_halving() {
        let pieces = distribute_mass(4.0, 1600.0, 36.0, false);
        assert_eq!(pieces, vec![400.0, 200.0, 100.0, 100.0]);
        let kept = 1600.0 - pieces.iter().sum::<f64>();
        assert_eq!(kept, 800.0);
    }

    #[test]
    fn test_distribute_mass_small_and_monotone() {
        assert!(distribute_mass(0.0, 1000.0, 10.0, false).is_empty());

        let small = distribute_mass(15.0, 100.0, 10.0, false);
        assert_eq!(small.len(), 8);
        assert!(small.iter().all(|&m| (m - 100.0 / 9.0).abs() < 1e-9));

        let flat = distribute_mass(5.0, 100.0, 30.0, true);
        assert_eq!(flat.len(), 3);
        assert!(flat.iter().all(|&m| (m - 25.0).abs() < 1e-9));
    }

    #[test]
    fn test_merge_conserves_area() {
        let mut e = quiet_engine(|_| {});
        let (_, cid) = bot(&mut e);
        let big = place(&mut e, cid, 0.0, 0.0, 300.0);
        let small = place(&mut e, cid, 50.0, 0.0, 100.0);
        for id in [big, small] {
            e.world.pool.get(id).add_flags(CellFlags::MERGE | CellFlags::COLL);
        }

        e.resolve();
        e.post_resolve();

        let cell = e.world.pool.get(big);
        assert!((cell.r() * cell.r() - 100_000.0).abs() < 1e-6);
        assert!(e.world.pool.get(small).flags().contains(CellFlags::REMOVE));
        assert_eq!(e.world.pool.get(small).eaten_by(), Some(big));
        assert_eq!(e.controls[&cid].cells, vec![big]);
        assert!(e.removed.contains(&small));
    }

    #[test]
    fn test_colliding_siblings_separate() {
        let mut e = quiet_engine(|_| {});
        let (_, cid) = bot(&mut e);
        let a = place(&mut e, cid, 0.0, 0.0, 200.0);
        let b = place(&mut e, cid, 300.0, 0.0, 200.0);
        for id in [a, b] {
            e.world.pool.get(id).add_flags(CellFlags::COLL);
        }

        e.resolve();

        let (ca, cb) = (e.world.pool.get(a), e.world.pool.get(b));
        assert!(cb.x() - ca.x() > 300.0);
        assert!(!ca.flags().contains(CellFlags::REMOVE));
        assert!(!cb.flags().contains(CellFlags::REMOVE));
        assert_eq!(e.queries().phase0.effective, 1);
    }

    #[test]
    fn test_contested_cell_is_eaten_once() {
        let mut e = engine_with_workers(4);
        let mut eaters = Vec::new();
        for i in 0..4 {
            let (h, cid) = bot(&mut e);
            e.handles.get_mut(&h).unwrap().perms = 0;
            let angle = f64::from(i) * std::f64::consts::FRAC_PI_2;
            eaters.push(place(&mut e, cid, angle.cos() * 100.0, angle.sin() * 100.0, 1000.0));
        }
        let (_, victim) = bot(&mut e);
        let prey = place(&mut e, victim, 0.0, 0.0, 100.0);

        e.resolve();

        let area: f64 = eaters.iter().map(|&id| e.world.pool.get(id).r().powi(2)).sum();
        assert!((area - (4.0 * 1e6 + 1e4)).abs() < 1e-3);
        let eater = e.world.pool.get(prey).eaten_by().unwrap();
        assert!(eaters.contains(&eater));
        assert!(!e.controls[&victim].alive);
    }

    #[test]
    fn test_pellets_go_to_one_eater() {
        let mut e = quiet_engine(|_| {});
        let (_, a) = bot(&mut e);
        let (_, b) = bot(&mut e);
        let ca = place(&mut e, a, -50.0, 0.0, 400.0);
        let cb = place(&mut e, b, 50.0, 0.0, 400.0);
        let pellet = e.world.pool.alloc(kind::PELLET, 0.0, 0.0, 10.0);
        e.world.pellets.insert(pellet, e.world.pool.get(pellet));

        e.resolve();

        let grown = [ca, cb].iter().filter(|&&id| e.world.pool.get(id).r() > 400.0).count();
        assert_eq!(grown, 1);
        assert_eq!(e.removed, vec![pellet]);
    }

    #[test]
    fn test_virus_pops_player_cell() {
        let mut e = quiet_engine(|c| c.virus.monotone_pop = false);
        let (_, cid) = bot(&mut e);
        let cell = place(&mut e, cid, 0.0, 0.0, 600.0);
        let virus = e.world.new_virus(100.0, 0.0, Boost::default());
        e.viruses.push(virus);

        e.resolve();
        e.post_resolve();

        assert!(e.controls[&cid].cells.len() > 1);
        assert_eq!(e.controls[&cid].last_popped, e.now());
        assert!(e.world.pool.get(virus).flags().contains(CellFlags::REMOVE));
        assert!(e.viruses.is_empty());
        let area: f64 = e.controls[&cid].cells.iter().map(|&id| e.world.pool.get(id).r().powi(2)).sum();
        let expected = 600.0f64.powi(2) + e.world.config.virus.size.powi(2);
        assert!((area - expected).abs() < 1e-3);
    }

    #[test]
    fn test_fed_virus_splits() {
        let mut e = quiet_engine(|c| {
            c.virus.size = 100.0;
            c.virus.split_size = 120.0;
            c.virus.split_boost = 500.0;
        });
        let virus = e.world.new_virus(0.0, 0.0, Boost::default());
        e.viruses.push(virus);
        let eject = e.world.pool.alloc(kind::EJECT_BIT | 1, 30.0, 0.0, 80.0);
        let ec = e.world.pool.get(eject);
        ec.set_boost(Boost::new(1.0, 0.0, 300.0));
        ec.add_flags(CellFlags::UPDATE);
        e.world.hazards.insert(eject, ec);
        e.ejected.push(eject);

        e.resolve();
        e.post_resolve();

        assert_eq!(e.viruses.len(), 2);
        assert!(e.ejected.is_empty());
        assert_eq!(e.world.pool.get(virus).r(), 100.0);
        let child = e.world.pool.get(e.viruses[1]).boost();
        assert!((child.x - 1.0).abs() < 1e-9);
        assert_eq!(child.d, 500.0);
    }

    fn feed(e: &mut Engine, x: f64, y: f64, r: f64) {
        let id = e.world.pool.alloc(kind::EJECT_BIT | 1, x, y, r);
        let cell = e.world.pool.get(id);
        cell.set_boost(Boost::new(1.0, 0.0, 300.0));
        cell.add_flags(CellFlags::UPDATE);
        e.world.hazards.insert(id, cell);
        e.ejected.push(id);
    }

    #[test]
    fn test_virus_fed_twice_splits_twice() {
        let mut e = quiet_engine(|c| {
            c.virus.size = 100.0;
            c.virus.split_size = 105.0;
            c.virus.split_boost = 500.0;
        });
        let virus = e.world.new_virus(0.0, 0.0, Boost::default());
        e.viruses.push(virus);
        feed(&mut e, 0.0, 50.0, 40.0);
        feed(&mut e, 0.0, -50.0, 40.0);

        e.resolve();
        assert_eq!(e.virus_to_split, vec![virus, virus]);
        e.post_resolve();

        assert_eq!(e.viruses.len(), 3);
        assert!(e.ejected.is_empty());
        assert_eq!(e.world.pool.get(virus).r(), 100.0);
        for &child in &e.viruses[1..] {
            assert_eq!(e.world.pool.get(child).boost().d, 500.0);
        }
    }

    #[test]
    fn test_exploding_virus_leaves_pieces_in_place() {
        let mut e = quiet_engine(|c| {
            c.virus.size = 100.0;
            c.virus.max_size = 200.0;
            c.virus.split_size = 0.0;
            c.virus.split_boost = 0.0;
            c.virus.explode = true;
        });
        let virus = e.world.new_virus(0.0, 0.0, Boost::default());
        e.world.pool.get(virus).set_r(190.0);
        e.viruses.push(virus);
        feed(&mut e, 30.0, 0.0, 80.0);

        e.resolve();
        e.post_resolve();

        assert_eq!(e.world.pool.get(virus).r(), 100.0);
        assert_eq!(e.viruses.len(), 5);
        for &piece in &e.viruses[1..] {
            let cell = e.world.pool.get(piece);
            assert_eq!((cell.x(), cell.y()), (0.0, 0.0));
            assert_eq!(cell.r(), 100.0);
            assert_eq!(cell.boost().d, 0.0);
        }
    }
}
