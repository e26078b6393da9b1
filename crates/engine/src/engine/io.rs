//! Handle I/O: input sync, per-control actions and handle hooks.

use std::f64::consts::FRAC_1_SQRT_2;
use std::time::Instant;

use bytes::Bytes;
use protocol::{TabState, ViewHeader};
use rand::Rng;

use super::world::{Influence, World};
use super::{Engine, job_rng, lap};
use crate::bot::BotContext;
use crate::cell::{CellFlags, CellId, kind};
use crate::control::{Control, SplitAttempt};
use crate::geometry::{Aabb, Boost};
use crate::handle::{Handle, HandleId, HandleKind};
use crate::player::FrameSource;

/// Spectating target that follows the biggest handle.
pub const SPECTATE_BIGGEST: u16 = u16::MAX;
/// View scale while spectating.
const SPECTATE_FACTOR: f64 = 1.5;

/// What one worker collected while running control actions.
#[derive(Default)]
struct IoOut {
    ejected: Vec<CellId>,
    spawns: Vec<u16>,
    kills: Vec<(u16, bool)>,
}

/// Budget decrement that is true while the budget is non-zero. A
/// fractional budget never hits zero exactly, so the eject cooldown is the
/// effective limit.
#[inline]
fn take(budget: &mut f32) -> bool {
    let left = *budget != 0.0;
    *budget -= 1.0;
    left
}

fn split(world: &World, c: &mut Control, now: u64) {
    let p = &world.config.player;
    let (min_split, radius_thresh) = if p.normalize_thresh_mass > 0.0 {
        let multi = (c.score / p.normalize_thresh_mass).sqrt().max(1.0);
        (multi * p.min_split_size, (p.normalize_thresh_mass * 100.0).sqrt())
    } else {
        (p.min_split_size, 0.0)
    };
    let fast_r = world.config.eat.fast_boost_radius;

    let expire = if c.score > p.split_cap_t1 {
        9
    } else if c.score > p.split_cap_t2 {
        7
    } else {
        11
    };
    let max_cells = c.overrides.max_cells(p.max_cells);

    let splits = std::mem::take(&mut c.splits);
    if splits > 0 {
        c.split_attempts.push(SplitAttempt {
            attempt: u8::try_from(splits).unwrap_or(u8::MAX),
            tick: 0,
        });
    }

    for i in 0..c.split_attempts.len() {
        let attempt = &mut c.split_attempts[i];
        attempt.attempt = attempt.attempt.saturating_sub(1);
        attempt.tick = attempt.tick.saturating_add(1);

        let snapshot = c.cells.clone();
        for id in snapshot {
            let cell = world.pool.get(id);
            if p.ultra_merge {
                cell.set_age(0.0);
            }
            if c.cells.len() >= max_cells {
                break;
            }
            let r = cell.r();
            if r < min_split {
                continue;
            }

            let (mut dx, mut dy) = (c.mouse.x - cell.x(), c.mouse.y - cell.y());
            let d = (dx * dx + dy * dy).sqrt();
            if d < 1.0 {
                (dx, dy) = (1.0, 0.0);
            } else {
                dx /= d;
                dy /= d;
            }

            let strength = if p.normalize_thresh_mass > 0.0 {
                ((r / radius_thresh).max(1.0) * p.split_boost).min(p.max_boost)
            } else if fast_r > 0.0 && r > fast_r {
                (r / fast_r).sqrt() * p.split_boost
            } else {
                p.split_boost
            };
            let child = world.split_from(id, r * FRAC_1_SQRT_2, Boost::new(dx, dy, strength));
            c.cells.push(child);
        }
        c.last_split = now;
    }

    c.split_attempts.retain(|s| s.attempt > 0 && s.tick < expire);
}

fn eject(world: &World, c: &mut Control, now: u64, dt: f64, rng: &mut impl Rng, out: &mut IoOut) {
    let p = &world.config.player;
    let e = &world.config.eject;
    if p.no_eject_pop_delay <= 0.0 || now <= c.last_popped + (p.no_eject_pop_delay * 1e6) as u64 {
        return;
    }

    let mut budget = (dt / e.delay) as f32;
    let mut ejects = std::mem::take(&mut c.ejects);
    let eject_macro = c.eject_macro;
    let size = c.overrides.eject * e.size;
    let strength = c.overrides.boost * e.boost;
    let loss_sqr = e.loss * e.loss;
    let tag = c.id | kind::EJECT_BIT;

    let mut count: u16 = 0;
    // Stamps are summed in f32. After days of uptime they round by tens of
    // milliseconds and macro-eject timing relies on that.
    while c.last_eject as f32 <= now as f32 + dt as f32 * 1e6 && (ejects > 0 || eject_macro) && take(&mut budget) {
        ejects = ejects.saturating_sub(1);
        count = count.saturating_add(1);

        for &id in &c.cells {
            let cell = world.pool.get(id);
            let r = cell.r();
            if r < p.min_eject_size || f64::from(cell.age()) < p.no_eject_delay {
                continue;
            }

            let (mut dx, mut dy) = (c.mouse.x - cell.x(), c.mouse.y - cell.y());
            let d = (dx * dx + dy * dy).sqrt();
            if d < 1.0 {
                (dx, dy) = (1.0, 0.0);
            } else {
                dx /= d;
                dy /= d;
            }
            let (sx, sy) = (cell.x() + dx * r, cell.y() + dy * r);
            if e.dispersion > 0.0 {
                let angle = dx.atan2(dy) + rng.random_range(-e.dispersion..=e.dispersion);
                (dx, dy) = (angle.sin(), angle.cos());
            }

            let n = world.pool.alloc(tag, sx, sy, size);
            let ejected = world.pool.get(n);
            ejected.set_boost(Boost::new(dx, dy, strength));
            world.hazards.insert(n, ejected);
            out.ejected.push(n);

            cell.set_r((r * r - loss_sqr).sqrt());
            cell.add_flags(CellFlags::UPDATE);
        }

        c.last_eject = (now as f32 + e.delay as f32 * 1e6 * f32::from(count)) as u64;
    }
}

/// Whether a control waiting to spawn has sat out its delay.
fn spawn_ready(world: &World, c: &Control, now: u64) -> bool {
    let since = now.saturating_sub(c.last_spawned.max(c.last_dead));
    let seconds = (since / 1_000_000) as f64 / 1000.0;
    seconds > world.config.player.spawn_delay
}

impl Engine {
    pub(super) fn handle_io(&mut self, dt: f64) {
        let mut t = Instant::now();
        self.biggest = self.find_biggest();
        self.sync_inputs();

        let restart_score = self.world.config.restart_score();
        let kill_oversize = self.world.config.world.kill_oversize;
        let (mut player_mass, mut bot_mass) = (0.0, 0.0);
        self.alive_controls.clear();

        let ids: Vec<u16> = self.controls.keys().copied().collect();
        for id in ids {
            let Some(c) = self.controls.get(&id) else {
                continue;
            };
            let Some(handle) = c.handle else {
                if c.cells.is_empty() {
                    self.controls.remove(&id);
                    self.spawn_set.remove(&id);
                    self.kills.retain(|&(k, _)| k != id);
                }
                continue;
            };

            let (score, x, y) = (c.score, c.viewport.x, c.viewport.y);
            if score > restart_score {
                if kill_oversize {
                    self.delay_kill(id, false);
                } else {
                    self.should_restart = true;
                }
            }
            self.influences.push(Influence {
                x,
                y,
                r: (score * 100.0).sqrt() * 1.25,
            });
            if self.handles.get(&handle).is_some_and(Handle::is_bot) {
                bot_mass += score;
            } else {
                player_mass += score;
                self.alive_controls.push(id);
            }
        }

        if !self.ignore_input {
            self.control_actions(dt);
        }
        self.timings.io[0] = lap(&mut t);

        let world = &mut self.world;
        world.tree.restructure(&world.pool);
        self.player_mass = player_mass;
        self.bot_mass = bot_mass;
        self.timings.io[1] = lap(&mut t);

        self.bot_hooks();
        self.player_hooks();
        self.timings.io[2] = lap(&mut t);
    }

    /// Spectatable handle with the highest positive score.
    fn find_biggest(&self) -> Option<HandleId> {
        let mut best = None;
        let mut best_score = 0.0;
        for (&id, h) in &self.handles {
            if !h.spectatable() {
                continue;
            }
            let score = h.score(&self.controls, &self.handles);
            if score > best_score {
                best_score = score;
                best = Some(id);
            }
        }
        best
    }

    /// Copy each player's pending tab input into its controls.
    fn sync_inputs(&mut self) {
        let now = self.now;
        let mut requested = Vec::new();
        let players: Vec<HandleId> = self
            .handles
            .iter()
            .filter(|(_, h)| h.is_player())
            .map(|(&id, _)| id)
            .collect();

        for id in players {
            let Some(h) = self.handles.get(&id) else {
                continue;
            };
            let alive = h.is_alive(&self.controls, &self.handles);
            let own = h.control;
            let partner = h.dual.and_then(|d| self.handles.get(&d)).and_then(|d| d.control);

            let Engine { handles, controls, world, .. } = self;
            let Some(HandleKind::Player(view)) = handles.get_mut(&id).map(|h| &mut h.kind) else {
                continue;
            };
            for (tab, control) in [own, partner].into_iter().enumerate() {
                match control.and_then(|c| controls.get_mut(&c)) {
                    Some(c) => view.sync_tab(tab, alive, c, &world.pool, now, &mut requested),
                    None => {
                        view.clear_tab(tab);
                        break;
                    }
                }
            }
        }

        for (id, replace) in requested {
            self.delay_kill(id, replace);
        }
    }

    /// Split, eject and spawn requests of every driven control, in parallel.
    fn control_actions(&mut self, dt: f64) {
        let (seed, tick, now) = (self.seed, self.tick_count, self.now);
        let Engine { world, controls, workers, .. } = self;
        let world = &*world;

        let items: Vec<&mut Control> = controls.values_mut().filter(|c| c.handle.is_some()).collect();
        let outs = workers.run(items, IoOut::default, |out, c| {
            let mut rng = job_rng(seed, tick, u64::from(c.id));
            let p = &world.config.player;
            c.calculate_viewport(&world.pool, p.view_min, p.view_scale);
            split(world, c, now);
            eject(world, c, now, dt, &mut rng, out);
            if c.can_spawn(&mut out.kills) && spawn_ready(world, c, now) {
                c.spawning = false;
                out.spawns.push(c.id);
            }
        });

        for out in outs {
            self.ejected.extend(out.ejected);
            self.spawn_set.extend(out.spawns);
            for (id, replace) in out.kills {
                self.delay_kill(id, replace);
            }
        }
    }

    /// Bot brains only touch their own control, so they run on the pool.
    fn bot_hooks(&mut self) {
        let (seed, tick, now) = (self.seed, self.tick_count, self.now);
        let (usage, bot_mass, player_mass) = (self.usage, self.bot_mass, self.player_mass);
        let (update_bot, always_spawn) = (self.update_bot, self.always_spawn_bot);
        let Engine { world, controls, handles, workers, .. } = self;
        let world = &*world;
        let cfg = &world.config;
        let ctx = BotContext {
            now,
            usage,
            ai: &cfg.bot.ai,
            spawn_size: cfg.bot.spawn_size,
            min_eject_size: cfg.player.min_eject_size,
            max_cells: cfg.player.max_cells,
            bot_mass,
            player_mass,
            always_spawn,
        };

        let mut by_id: std::collections::BTreeMap<u16, &mut Control> =
            controls.iter_mut().map(|(&id, c)| (id, c)).collect();
        let items: Vec<(&mut Handle, &mut Control)> = handles
            .values_mut()
            .filter(|h| h.is_bot())
            .filter_map(|h| {
                let c = by_id.remove(&h.control?)?;
                Some((h, c))
            })
            .collect();

        let outs = workers.run(items, Vec::new, |kills, (h, c)| {
            h.view_area = c.viewport.to_aabb().area();
            match &mut h.kind {
                HandleKind::Bot(brain) if update_bot => {
                    let mut rng = job_rng(seed, tick, u64::from(c.id));
                    brain.on_tick(&ctx, c, &world.pool, &mut rng, kills);
                }
                HandleKind::Rock(brain) => brain.on_tick(c, &world.pool, kills),
                _ => {}
            }
        });

        for (id, replace) in outs.into_iter().flatten() {
            self.delay_kill(id, replace);
        }
    }

    /// Human handles, one after another.
    fn player_hooks(&mut self) {
        let ids: Vec<HandleId> = self.handles.keys().copied().collect();
        for id in ids {
            let Some(h) = self.handles.get(&id) else {
                continue;
            };
            if h.is_bot() {
                continue;
            }
            let area = h
                .control
                .and_then(|c| self.controls.get(&c))
                .map_or(0.0, |c| c.viewport.to_aabb().area());
            let is_player = h.is_player();
            if let Some(h) = self.handles.get_mut(&id) {
                h.view_area = area;
            }
            if is_player {
                self.player_tick(id);
            }
        }
    }

    fn player_tick(&mut self, id: HandleId) {
        let Some(h) = self.handles.get(&id) else {
            return;
        };
        let alive = h.is_alive(&self.controls, &self.handles);
        let (was_alive, dual, own) = (h.was_alive, h.dual, h.control);

        if self.dual_enabled {
            if !was_alive && alive {
                if let Some(h) = self.handles.get_mut(&id) {
                    h.actual_spawn_tick = self.now;
                }
            }
        } else if was_alive && !alive {
            if let Some(c) = own.and_then(|c| self.controls.get_mut(&c)) {
                c.last_spawn_req = self.now;
            }
        }
        for h in [Some(id), dual].into_iter().flatten() {
            if let Some(h) = self.handles.get_mut(&h) {
                h.was_alive = alive;
            }
        }

        if let Some(frame) = self.player_frame(id) {
            self.frames.push((id, frame));
        }
    }

    /// Build the next delta frame for a player handle and advance its view
    /// cache. `None` for handles that are not players.
    pub fn player_frame(&mut self, id: HandleId) -> Option<Bytes> {
        let h = self.handles.get(&id)?;
        if !h.is_player() {
            return None;
        }
        let own = h.control?;
        let partner_of = |h: &Handle| h.dual.and_then(|d| self.handles.get(&d)).and_then(|d| d.control);

        let (c1, c2, factor) = match h.spectate.and_then(|s| self.handles.get(&s)) {
            Some(target) => {
                let c1 = target.control?;
                (c1, partner_of(target).unwrap_or(c1), SPECTATE_FACTOR)
            }
            None => (own, partner_of(h).unwrap_or(own), 1.0),
        };
        let (first, second) = (self.controls.get(&c1)?, self.controls.get(&c2)?);

        let map = self.world.map.to_aabb();
        let view_of = |c: &Control| c.viewport.scaled(factor).to_aabb().clip(&map);
        let (b1, b2) = (view_of(first), view_of(second));
        let viewports: Vec<Aabb> = match (first.alive, second.alive) {
            (false, false) => vec![self.controls.get(&own)?.viewport.to_aabb()],
            (true, false) => vec![b1],
            (false, true) => vec![b2],
            (true, true) => {
                let union = b1.union(&b2);
                if union.area() < b1.area() + b2.area() { vec![union] } else { vec![b1, b2] }
            }
        };

        let tab = |c: &Control| TabState {
            alive: c.alive,
            line_locked: c.line_lock as u8,
            id: c.id,
            cells: u16::try_from(c.cells.len()).unwrap_or(u16::MAX),
            score: c.score as f32,
            x: c.viewport.x as f32,
            y: c.viewport.y as f32,
        };
        let header = ViewHeader {
            spectating: h.spectate.is_some(),
            tabs: [tab(first), tab(second)],
            map_hw: self.world.map.hw as f32,
            map_hh: self.world.map.hh as f32,
        };
        let score = h.score(&self.controls, &self.handles);
        let show_perks = h.can_eat_perk(self.hide_perks, score, self.world.config.perk.min_perk_size);
        let extra = self.mode.extra_visible();

        let world = &self.world;
        let HandleKind::Player(view) = &mut self.handles.get_mut(&id)?.kind else {
            return None;
        };
        Some(view.encode_frame(&FrameSource {
            pool: &world.pool,
            pellets: &world.pellets,
            hazards: &world.hazards,
            tree: &world.tree,
            header,
            viewports: &viewports,
            show_perks,
            extra,
        }))
    }

    /// Point a player at another handle. Target is a control id, or
    /// [`SPECTATE_BIGGEST`]. Live players and their own controls clear it.
    pub fn spectate(&mut self, id: HandleId, target: u16) {
        if target == 0 {
            return;
        }
        let Some(h) = self.handles.get(&id) else {
            return;
        };
        if !h.is_player() {
            return;
        }
        let dual = h.dual;
        let own = [h.control, dual.and_then(|d| self.handles.get(&d)).and_then(|d| d.control)];
        let clear = |engine: &mut Engine| {
            for h in [Some(id), dual].into_iter().flatten() {
                if let Some(h) = engine.handles.get_mut(&h) {
                    h.spectate = None;
                }
            }
        };

        if h.is_alive(&self.controls, &self.handles) || own.contains(&Some(target)) {
            clear(self);
            return;
        }
        if target == SPECTATE_BIGGEST {
            let biggest = self.biggest.filter(|&b| b != id);
            if let Some(h) = self.handles.get_mut(&id) {
                h.spectate = biggest;
            }
            return;
        }

        let Some(handle) = self.controls.get(&target).and_then(|c| c.handle) else {
            return;
        };
        let Some(t) = self.handles.get(&handle) else {
            return;
        };
        let Some(watched) = (if t.spectatable() { Some(handle) } else { t.dual }) else {
            return;
        };
        if watched == id {
            clear(self);
            return;
        }

        let watched_dual = self.handles.get(&watched).and_then(|w| w.dual);
        if let Some(h) = self.handles.get_mut(&id) {
            h.spectate = Some(watched);
        }
        if let (Some(d), Some(wd)) = (dual, watched_dual) {
            if let Some(d) = self.handles.get_mut(&d) {
                d.spectate = Some(wd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{bot, place, quiet_engine};
    use super::*;
    use protocol::DeltaDecoder;

    #[test]
    fn test_split_halves_area_and_boosts_child() {
        let mut e = quiet_engine(|_| {});
        let (_, cid) = bot(&mut e);
        let parent = place(&mut e, cid, 0.0, 0.0, 400.0);
        {
            let c = e.controls.get_mut(&cid).unwrap();
            c.mouse = crate::geometry::Point::new(3000.0, 0.0);
            c.splits = 1;
        }
        e.tick(40.0);

        let c = &e.controls[&cid];
        assert_eq!(c.cells.len(), 2);
        assert!(c.split_attempts.is_empty());
        let child = c.cells[1];
        let (p, k) = (e.world.pool.get(parent), e.world.pool.get(child));
        let half = 400.0 * FRAC_1_SQRT_2;
        assert!((p.r() - half).abs() < 1e-6);
        assert!((k.r() - half).abs() < 1e-6);
        assert!((k.boost().d - 720.0).abs() < 1e-9);
        assert!(k.x() > e.world.config.player.split_dist + 80.0 - 1e-6);
        assert_eq!(k.y(), 0.0);

        let b = e.world.config.boost.clone();
        assert!(!b.new_algo);
        let mut expected = 720.0;
        for _ in 0..2 {
            let x = e.world.pool.get(child).x();
            e.tick(40.0);
            expected -= expected * (b.factor * 0.0025) * 40.0;
            let k = e.world.pool.get(child);
            assert!((k.boost().d - expected).abs() < 1e-9);
            assert!(k.x() > x);
        }
        assert!((expected - 583.2).abs() < 1e-9);
    }

    #[test]
    fn test_eject_peels_cells_towards_mouse() {
        let mut e = quiet_engine(|c| c.eject.dispersion = 0.0);
        let (_, cid) = bot(&mut e);
        let id = place(&mut e, cid, 0.0, 0.0, 400.0);
        e.world.pool.get(id).set_age(1000.0);
        e.now = 2_000_000_000;
        {
            let c = e.controls.get_mut(&cid).unwrap();
            c.mouse = crate::geometry::Point::new(0.0, 3000.0);
            c.ejects = 1;
        }
        e.handle_io(40.0);

        assert_eq!(e.ejected.len(), 1);
        let ej = e.world.pool.get(e.ejected[0]);
        assert_eq!(ej.tag(), cid | kind::EJECT_BIT);
        assert_eq!((ej.x(), ej.y()), (0.0, 400.0));
        let loss = e.world.config.eject.loss;
        assert!((e.world.pool.get(id).r() - (160000.0 - loss * loss).sqrt()).abs() < 1e-9);
        let delay = e.world.config.eject.delay;
        assert_eq!(e.controls[&cid].last_eject, (2e9f32 + delay as f32 * 1e6) as u64);
    }

    #[test]
    fn test_eject_stamp_rounds_in_single_precision() {
        let mut e = quiet_engine(|c| {
            c.eject.dispersion = 0.0;
            c.eject.delay = 100.0;
        });
        let (_, cid) = bot(&mut e);
        let id = place(&mut e, cid, 0.0, 0.0, 400.0);
        e.world.pool.get(id).set_age(1000.0);
        let week: u64 = 7 * 24 * 3600 * 1_000_000_000;
        e.now = week + 12_345_678;
        {
            let c = e.controls.get_mut(&cid).unwrap();
            c.mouse = crate::geometry::Point::new(0.0, 3000.0);
            c.ejects = 1;
        }
        e.handle_io(40.0);

        assert_eq!(e.ejected.len(), 1);
        let stamp = e.controls[&cid].last_eject;
        let expected = ((week + 12_345_678) as f32 + 100.0f32 * 1e6 * 1.0) as u64;
        assert_eq!(stamp, expected);
        // The exact stamp would be 100ms after now; single precision lands short of it
        assert_ne!(stamp, week + 12_345_678 + 100_000_000);
    }

    #[test]
    fn test_player_frame_reports_both_tabs() {
        let mut e = quiet_engine(|_| {});
        let hid = e.add_player();
        let own = e.handles[&hid].control.unwrap();
        let dual = e.handles[&hid].dual.and_then(|d| e.handles[&d].control).unwrap();
        place(&mut e, own, 100.0, 100.0, 300.0);
        let pellet = e.world.pool.alloc(kind::PELLET, 500.0, 0.0, 20.0);
        e.world.pellets.insert(pellet, e.world.pool.get(pellet));

        e.tick(40.0);
        let frames = e.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, hid);

        let mut dec = DeltaDecoder::new();
        let out = dec.apply(frames[0].1.clone()).unwrap();
        assert!(out.header.tabs[0].alive);
        assert_eq!(out.header.tabs[0].id, own);
        assert_eq!(out.header.tabs[1].id, dual);
        assert!(!out.header.spectating);
        assert_eq!(out.added, 2);
    }

    #[test]
    fn test_spectate_biggest_and_self() {
        let mut e = quiet_engine(|c| c.world.dual_enabled = false);
        let watcher = e.add_player();
        let (b, cid) = bot(&mut e);
        place(&mut e, cid, 0.0, 0.0, 500.0);
        e.tick(40.0);

        e.spectate(watcher, SPECTATE_BIGGEST);
        assert_eq!(e.handles[&watcher].spectate, Some(b));
        let own = e.handles[&watcher].control.unwrap();
        e.spectate(watcher, own);
        assert_eq!(e.handles[&watcher].spectate, None);
        e.spectate(watcher, cid);
        assert_eq!(e.handles[&watcher].spectate, Some(b));

        e.tick(40.0);
        let frames = e.take_frames();
        let out = DeltaDecoder::new().apply(frames[0].1.clone()).unwrap();
        assert!(out.header.spectating);
        assert_eq!(out.header.tabs[0].id, cid);
    }
}
