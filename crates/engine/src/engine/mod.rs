//! The authoritative tick engine.
//!
//! One [`Engine`] owns a cell pool, its spatial indices, every control and
//! handle, and a worker pool for the parallel phases. The host calls
//! [`Engine::tick`] at a fixed rate and collects frames, perks and win
//! events afterwards.

mod diagnostics;
mod io;
mod resolve;
mod spawn;
mod state;
mod update;
pub(crate) mod world;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

pub use diagnostics::{PhaseQueries, QUERY_LEVELS, QueryStats, TickTimings};
pub use io::SPECTATE_BIGGEST;

use crate::cell::{CellId, kind};
use crate::config::ModeConfig;
use crate::control::Control;
use crate::error::EngineError;
use crate::gamemodes::{GameMode, get_gamemode};
use crate::geometry::Boost;
use crate::handle::{Handle, HandleId, HandleKind, Perks};
use crate::player::{Input, PlayerView};
use crate::pool::CellPool;
use crate::workers::WorkerPool;
use world::{Influence, World};

/// Ticks between two timing reports.
const LOG_INTERVAL: u64 = 400;

/// A handle met its mode's win condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinEvent {
    pub handle: HandleId,
    pub control: u16,
}

pub struct Engine {
    pub(crate) world: World,
    pub(crate) controls: BTreeMap<u16, Control>,
    pub(crate) handles: BTreeMap<HandleId, Handle>,
    pub(crate) rng: StdRng,
    mode: Arc<dyn GameMode>,
    workers: WorkerPool,
    seed: u64,

    // Clock, in nanoseconds of simulated time
    now: u64,
    tick_count: u64,
    last_perk: u64,

    running: bool,
    should_restart: bool,
    ignore_input: bool,
    update_bot: bool,
    always_spawn_bot: bool,
    dual_enabled: bool,
    hide_perks: bool,

    next_handle: HandleId,
    bots: Vec<HandleId>,
    desired_bots: u32,
    biggest: Option<HandleId>,

    // Cells outside any control
    ejected: Vec<CellId>,
    viruses: Vec<CellId>,
    dead: Vec<CellId>,
    exps: Vec<CellId>,
    cyts: Vec<CellId>,
    removed: Vec<CellId>,
    virus_to_split: Vec<CellId>,

    kills: Vec<(u16, bool)>,
    spawn_set: BTreeSet<u16>,
    influences: Vec<Influence>,
    alive_controls: Vec<u16>,
    player_mass: f64,
    bot_mass: f64,

    // Output collected by the host
    frames: Vec<(HandleId, Bytes)>,
    events: Vec<WinEvent>,

    usage: f64,
    timings: TickTimings,
    queries: QueryStats,
}

/// Per-job RNG. Parallel jobs must not share the engine RNG, and the
/// stream of a job only depends on the seed, the tick and the salt.
pub(crate) fn job_rng(seed: u64, tick: u64, salt: u64) -> StdRng {
    StdRng::seed_from_u64(seed ^ (salt << 32) ^ tick)
}

/// Milliseconds since `t`, restarting `t`.
pub(crate) fn lap(t: &mut Instant) -> f64 {
    let now = Instant::now();
    let ms = now.duration_since(*t).as_secs_f64() * 1e3;
    *t = now;
    ms
}

impl Engine {
    /// Build an engine for a resolved mode table. `workers == 0` runs every
    /// phase on the calling thread. A missing seed is drawn at random.
    pub fn new(config: ModeConfig, workers: usize, seed: Option<u64>) -> Result<Self, EngineError> {
        config.validate()?;
        let mode: Arc<dyn GameMode> = Arc::from(get_gamemode(&config.name));
        let seed = seed.unwrap_or_else(rand::random);
        let dual_enabled = mode.dual_enabled(&config);
        let hide_perks = mode.hides_perks();
        let desired_bots = config.bot.count;

        let mut engine = Self {
            world: World::new(config),
            controls: BTreeMap::new(),
            handles: BTreeMap::new(),
            rng: StdRng::seed_from_u64(seed),
            mode,
            workers: WorkerPool::new(workers),
            seed,
            now: 0,
            tick_count: 0,
            last_perk: 0,
            running: false,
            should_restart: false,
            ignore_input: false,
            update_bot: true,
            always_spawn_bot: false,
            dual_enabled,
            hide_perks,
            next_handle: 1,
            bots: Vec::new(),
            desired_bots,
            biggest: None,
            ejected: Vec::new(),
            viruses: Vec::new(),
            dead: Vec::new(),
            exps: Vec::new(),
            cyts: Vec::new(),
            removed: Vec::new(),
            virus_to_split: Vec::new(),
            kills: Vec::new(),
            spawn_set: BTreeSet::new(),
            influences: Vec::new(),
            alive_controls: Vec::new(),
            player_mass: 0.0,
            bot_mass: 0.0,
            frames: Vec::new(),
            events: Vec::new(),
            usage: 0.0,
            timings: TickTimings::default(),
            queries: QueryStats::default(),
        };
        engine.restart();
        Ok(engine)
    }

    pub fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        info!("Engine started in {} mode with {} workers", self.mode.name(), self.workers.workers());
        true
    }

    pub fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        info!("Engine stopped after {} ticks", self.tick_count);
        true
    }

    /// Advance the world by `elapsed_ms` of wall time.
    pub fn tick(&mut self, elapsed_ms: f64) {
        if !self.running {
            return;
        }
        if self.should_restart {
            self.restart();
        }

        let start = Instant::now();
        let mut t = start;
        self.now += (elapsed_ms * 1e6) as u64;
        self.tick_count += 1;
        let dt = elapsed_ms * self.world.config.world.time_scale;
        let mode = Arc::clone(&self.mode);

        self.spawn_pellets();
        if mode.spawns_viruses() {
            self.spawn_viruses();
        }
        if mode.spawns_perks() {
            self.update_perks();
        }
        self.timings.spawn_cells = lap(&mut t);

        self.handle_io(dt);
        self.timings.handle_io = lap(&mut t);

        for (id, replace) in std::mem::take(&mut self.kills) {
            self.kill(id, replace);
        }
        mode.spawn_bots(self);
        self.spawn_players();
        self.timings.spawn_handles = lap(&mut t);

        self.update_cells(dt);
        self.timings.update_cells = lap(&mut t);

        self.resolve();
        self.post_resolve();
        let events = mode.post_resolve(self);
        self.events.extend(events);
        self.timings.resolve = lap(&mut t);

        let busy = start.elapsed().as_secs_f64() * 1e3;
        self.usage = if elapsed_ms > 0.0 { busy / elapsed_ms } else { 0.0 };
        if self.tick_count % LOG_INTERVAL == 0 {
            debug!(
                "Tick {}: {} (usage {:.1}%, {:?})",
                self.tick_count,
                self.timings,
                self.usage * 100.0,
                self.world.pool
            );
        }
    }

    /// Clear the world and let the mode set it up again.
    pub fn restart(&mut self) {
        self.reset_world(true);
        let mode = Arc::clone(&self.mode);
        mode.on_restart(self);
        info!("World restarted ({} mode)", mode.name());
    }

    /// Drop every cell and index entry. Controls and handles stay.
    pub(crate) fn reset_world(&mut self, clear_pool: bool) {
        let world = &mut self.world;
        if clear_pool {
            world.pool.reset();
        }
        world.tree.clear();
        world.pellets.clear();
        world.hazards.clear();

        self.ejected.clear();
        self.viruses.clear();
        self.dead.clear();
        self.exps.clear();
        self.cyts.clear();
        self.removed.clear();
        self.virus_to_split.clear();
        self.kills.clear();
        self.spawn_set.clear();
        self.influences.clear();

        for c in self.controls.values_mut() {
            c.cells.clear();
            c.sorted.clear();
            c.alive = false;
            c.score = 0.0;
            c.reset_timer();
        }
        self.should_restart = false;
        self.desired_bots = self.world.config.bot.count;
    }

    /// Remove a control's cells now. With `replace` and enough mass they
    /// turn into dead remnants in place.
    pub(crate) fn kill(&mut self, id: u16, replace: bool) {
        let spawn_size = self.world.config.player.spawn_size;
        let thresh = (100.0 + spawn_size) * (100.0 + spawn_size) * 0.01;
        let Engine { world, controls, dead, .. } = self;
        let Some(c) = controls.get_mut(&id) else {
            return;
        };

        if replace && c.score >= thresh {
            for &cell_id in &c.cells {
                let old = world.pool.get(cell_id);
                let n = world.pool.alloc(kind::DEAD, old.x(), old.y(), old.r());
                let remnant = world.pool.get(n);
                remnant.set_aabb(old.aabb());
                remnant.set_boost(old.boost());
                world.tree.swap(cell_id, old, n, remnant);
                world.pool.free(cell_id);
                dead.push(n);
            }
        } else {
            for &cell_id in &c.cells {
                world.tree.remove(cell_id, world.pool.get(cell_id));
                world.pool.free(cell_id);
            }
        }
        c.alive = false;
        c.cells.clear();
        c.sorted.clear();
    }

    /// Queue a kill for the next drain. Dead controls are ignored.
    pub fn delay_kill(&mut self, id: u16, replace: bool) {
        if self.controls.get(&id).is_some_and(|c| c.alive) {
            self.kills.push((id, self.mode.delay_kill_replaces(replace)));
        }
    }

    fn free_control_id(&self, hint: u16) -> u16 {
        let mut id = hint.max(1);
        while self.controls.contains_key(&id) {
            id += 1;
        }
        id
    }

    /// Create a handle and its control, using the lowest free control id
    /// at or above `hint`.
    fn insert_handle(&mut self, kind: HandleKind, hint: u16) -> HandleId {
        let cid = self.free_control_id(hint);
        let id = self.next_handle;
        self.next_handle += 1;

        let mut control = Control::new(cid, self.world.config.player.view_min);
        control.handle = Some(id);
        self.controls.insert(cid, control);
        self.handles.insert(id, Handle::new(kind, cid));

        let mode = Arc::clone(&self.mode);
        mode.on_handle_added(self, id);
        id
    }

    /// Create a bot handle and count it towards the population.
    pub(crate) fn insert_bot(&mut self, kind: HandleKind, hint: u16) -> HandleId {
        let id = self.insert_handle(kind, hint);
        self.bots.push(id);
        debug!("Bot {} joined on control {}", id, self.handles.get(&id).and_then(|h| h.control).unwrap_or(0));
        id
    }

    /// Join a human player. With dual tabs enabled a partner handle with its
    /// own control joins as well.
    pub fn add_player(&mut self) -> HandleId {
        let capacity = self.world.pool.capacity();
        let id = self.insert_handle(HandleKind::Player(Box::new(PlayerView::new(capacity))), 1);
        let mut tabs = vec![id];
        if self.dual_enabled {
            let dual = self.insert_handle(HandleKind::Dual { owner: id }, 1);
            if let Some(h) = self.handles.get_mut(&id) {
                h.dual = Some(dual);
            }
            if let Some(h) = self.handles.get_mut(&dual) {
                h.dual = Some(id);
            }
            tabs.push(dual);
        }

        let can_spawn = self.world.config.spawn.player_can_spawn;
        for tab in tabs {
            if let Some(c) = self.handles.get(&tab).and_then(|h| h.control).and_then(|c| self.controls.get_mut(&c)) {
                c.overrides.can_spawn = can_spawn;
            }
        }
        info!("Player {} joined", id);
        id
    }

    /// Add one bot of the mode's kind.
    pub fn add_bot(&mut self) -> HandleId {
        let mode = Arc::clone(&self.mode);
        mode.create_bot(self, None)
    }

    /// Detach a handle. Its control is killed with a remnant and removed
    /// once its last cell is gone. A player takes its dual tab along.
    pub fn remove_handle(&mut self, id: HandleId) {
        let Some(h) = self.handles.remove(&id) else {
            return;
        };
        if let Some(cid) = h.control {
            self.delay_kill(cid, true);
            if let Some(c) = self.controls.get_mut(&cid) {
                c.handle = None;
            }
        }
        for other in self.handles.values_mut() {
            if other.spectate == Some(id) {
                other.spectate = None;
            }
        }
        if self.biggest == Some(id) {
            self.biggest = None;
        }
        self.bots.retain(|&b| b != id);

        match h.kind {
            HandleKind::Player(_) => {
                if let Some(dual) = h.dual {
                    self.remove_handle(dual);
                }
                info!("Player {} left", id);
            }
            HandleKind::Dual { owner } => {
                if let Some(o) = self.handles.get_mut(&owner) {
                    o.dual = None;
                }
            }
            HandleKind::Bot(_) | HandleKind::Rock(_) => debug!("Bot {} left", id),
        }
    }

    /// Remove the lowest-scoring bot.
    pub(crate) fn drop_weakest_bot(&mut self) {
        let score = |id: &HandleId| {
            self.handles
                .get(id)
                .map_or(0.0, |h| h.score(&self.controls, &self.handles))
        };
        let weakest = self.bots.iter().min_by(|a, b| score(a).total_cmp(&score(b))).copied();
        if let Some(id) = weakest {
            self.remove_handle(id);
        }
    }

    pub fn desired_bots(&self) -> u32 {
        self.desired_bots
    }

    /// Target bot population. Reset to the mode default on restart.
    pub fn set_desired_bots(&mut self, count: u32) {
        self.desired_bots = count;
    }

    pub fn bots(&self) -> &[HandleId] {
        &self.bots
    }

    fn player_view(&mut self, id: HandleId) -> Option<&mut PlayerView> {
        match &mut self.handles.get_mut(&id)?.kind {
            HandleKind::Player(view) => Some(view),
            _ => None,
        }
    }

    /// Replace the pending input of one tab. Consumed on the next tick.
    pub fn set_input(&mut self, id: HandleId, tab: u8, input: Input) {
        if tab > 1 {
            return;
        }
        if let Some(view) = self.player_view(id) {
            view.inputs[usize::from(tab)] = input;
        }
    }

    pub fn set_active_tab(&mut self, id: HandleId, tab: u8) {
        if tab > 1 {
            return;
        }
        if let Some(view) = self.player_view(id) {
            view.active_tab = tab;
        }
    }

    /// Ask for a spawn on one tab of a player.
    pub fn request_spawn(&mut self, id: HandleId, tab: u8) {
        if tab > 1 {
            return;
        }
        if let Some(view) = self.player_view(id) {
            view.inputs[usize::from(tab)].spawn = true;
        }
    }

    pub fn set_perms(&mut self, id: HandleId, perms: u16) {
        if let Some(h) = self.handles.get_mut(&id) {
            h.perms = perms;
        }
    }

    /// Drop a virus at a point. Returns its cell id.
    pub fn spawn_virus_at(&mut self, x: f64, y: f64) -> CellId {
        let world = &self.world;
        let id = world.new_virus(x, y, Boost::default());
        let cell = world.pool.get(id);
        world.bounce(cell);
        world.hazards.update(id, cell);
        self.viruses.push(id);
        id
    }

    pub fn control(&self, id: u16) -> Option<&Control> {
        self.controls.get(&id)
    }

    /// Mutable access to a control, mainly for its override table.
    pub fn control_mut(&mut self, id: u16) -> Option<&mut Control> {
        self.controls.get_mut(&id)
    }

    pub fn controls(&self) -> impl Iterator<Item = &Control> {
        self.controls.values()
    }

    pub fn handle(&self, id: HandleId) -> Option<&Handle> {
        self.handles.get(&id)
    }

    pub fn handles(&self) -> impl Iterator<Item = (HandleId, &Handle)> {
        self.handles.iter().map(|(&id, h)| (id, h))
    }

    /// Perks eaten since the last call, per handle.
    pub fn take_perks(&mut self) -> Vec<(HandleId, Perks)> {
        let mut out = Vec::new();
        for (&id, h) in &mut self.handles {
            if h.perks.updated() {
                out.push((id, h.perks));
                h.perks.reset();
            }
        }
        out
    }

    /// Frames built for player handles during the last ticks.
    pub fn take_frames(&mut self) -> Vec<(HandleId, Bytes)> {
        std::mem::take(&mut self.frames)
    }

    pub fn take_events(&mut self) -> Vec<WinEvent> {
        std::mem::take(&mut self.events)
    }

    /// Simulated time in nanoseconds.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn mode_name(&self) -> &str {
        self.mode.name()
    }

    pub fn config(&self) -> &ModeConfig {
        &self.world.config
    }

    pub fn pool(&self) -> &CellPool {
        &self.world.pool
    }

    /// Stop feeding player input into controls.
    pub fn set_ignore_input(&mut self, ignore: bool) {
        self.ignore_input = ignore;
    }

    /// Toggle the bot brains. Rocks keep rolling.
    pub fn set_update_bot(&mut self, update: bool) {
        self.update_bot = update;
    }

    /// Let bots respawn regardless of the spawn mass cap.
    pub fn set_always_spawn_bot(&mut self, always: bool) {
        self.always_spawn_bot = always;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellFlags;
    use crate::handle::perms;

    /// A small running engine with no passive spawns and frozen bots.
    pub(super) fn quiet_engine(tune: impl FnOnce(&mut ModeConfig)) -> Engine {
        let mut config = ModeConfig::preset("ffa").unwrap();
        config.world.map_hw = 5000.0;
        config.world.map_hh = 5000.0;
        config.world.cell_limit = 4096;
        config.world.grid_pellet_size = 16;
        config.world.grid_hazard_size = 16;
        config.world.time_scale = 1.0;
        config.pellet.count = 0;
        config.virus.count = 0;
        config.bot.count = 0;
        config.perk.max_cyt_cells = 0;
        config.perk.max_exp_cells = 0;
        tune(&mut config);

        let mut e = Engine::new(config, 0, Some(7)).unwrap();
        e.set_update_bot(false);
        e.start();
        e
    }

    /// Add a frozen bot and keep the population target in step.
    pub(super) fn bot(e: &mut Engine) -> (HandleId, u16) {
        let id = e.add_bot();
        e.set_desired_bots(e.bots().len() as u32);
        (id, e.handles[&id].control.unwrap())
    }

    /// Put a live cell for `control` straight into the tree.
    pub(super) fn place(e: &mut Engine, control: u16, x: f64, y: f64, r: f64) -> CellId {
        let id = e.world.pool.alloc(control, x, y, r);
        let cell = e.world.pool.get(id);
        cell.update_aabb();
        e.world.tree.insert(id, cell);
        let c = e.controls.get_mut(&control).unwrap();
        c.cells.push(id);
        c.alive = true;
        id
    }

    #[test]
    fn test_tick_requires_start() {
        let mut e = quiet_engine(|_| {});
        assert!(!e.start());
        assert!(e.stop());
        e.tick(40.0);
        assert_eq!(e.now(), 0);
        assert!(e.start());
        e.tick(40.0);
        assert_eq!(e.now(), 40_000_000);
        assert_eq!(e.tick_count(), 1);
    }

    #[test]
    fn test_add_player_links_dual_tab() {
        let mut e = quiet_engine(|_| {});
        let (_, bot_control) = bot(&mut e);
        let id = e.add_player();
        let h = &e.handles[&id];
        let dual = h.dual.unwrap();
        assert_eq!(e.handles[&dual].dual, Some(id));
        assert_eq!(bot_control, 1);
        assert_eq!(h.control, Some(2));
        assert_eq!(e.handles[&dual].control, Some(3));

        e.remove_handle(id);
        assert!(e.handle(id).is_none());
        assert!(e.handle(dual).is_none());
        e.tick(40.0);
        assert!(e.control(2).is_none());
        assert!(e.control(3).is_none());
        assert!(e.control(1).is_some());
    }

    #[test]
    fn test_bot_population_follows_target() {
        let mut e = quiet_engine(|_| {});
        e.set_desired_bots(2);
        e.tick(40.0);
        e.tick(40.0);
        assert_eq!(e.bots().len(), 2);
        e.tick(40.0);
        assert_eq!(e.bots().len(), 2);

        e.set_desired_bots(0);
        e.tick(40.0);
        assert_eq!(e.bots().len(), 1);
        e.tick(40.0);
        assert!(e.bots().is_empty());
    }

    #[test]
    fn test_kill_with_replace_leaves_remnants() {
        let mut e = quiet_engine(|_| {});
        let (_, cid) = bot(&mut e);
        let a = place(&mut e, cid, -1000.0, 0.0, 600.0);
        place(&mut e, cid, 1000.0, 0.0, 600.0);
        e.controls.get_mut(&cid).unwrap().score = 7200.0;
        let before = e.world.pool.get(a).aabb();

        e.kill(cid, true);
        assert!(!e.controls[&cid].alive);
        assert!(e.controls[&cid].cells.is_empty());
        assert_eq!(e.dead.len(), 2);
        let remnant = e.world.pool.get(e.dead[0]);
        assert_eq!(remnant.tag(), kind::DEAD);
        assert_eq!(remnant.aabb(), before);
        assert!(!e.world.pool.get(a).flags().contains(CellFlags::EXIST));
        assert_eq!(e.world.pool.count(), 2);
    }

    #[test]
    fn test_kill_without_mass_frees_cells() {
        let mut e = quiet_engine(|_| {});
        let (_, cid) = bot(&mut e);
        place(&mut e, cid, 0.0, 0.0, 100.0);
        e.controls.get_mut(&cid).unwrap().score = 100.0;
        e.kill(cid, true);
        assert!(e.dead.is_empty());
        assert_eq!(e.world.pool.count(), 0);
    }

    #[test]
    fn test_delay_kill_skips_dead_controls() {
        let mut e = quiet_engine(|_| {});
        let (_, cid) = bot(&mut e);
        e.delay_kill(cid, true);
        assert!(e.kills.is_empty());
        place(&mut e, cid, 0.0, 0.0, 100.0);
        e.delay_kill(cid, true);
        assert_eq!(e.kills, vec![(cid, true)]);
    }

    #[test]
    fn test_spawn_virus_at_bounces_inside_map() {
        let mut e = quiet_engine(|_| {});
        let id = e.spawn_virus_at(6000.0, 0.0);
        let cell = e.world.pool.get(id);
        assert_eq!(cell.tag(), kind::VIRUS);
        assert!(cell.x() < 5000.0);
        assert_eq!(e.world.hazards.len(), 1);
        assert_eq!(e.viruses, vec![id]);
    }

    #[test]
    fn test_player_spawns_after_request() {
        let mut e = quiet_engine(|c| c.world.dual_enabled = false);
        let id = e.add_player();
        e.set_perms(id, perms::TP);
        e.request_spawn(id, 0);
        for _ in 0..30 {
            e.tick(40.0);
        }
        let cid = e.handles[&id].control.unwrap();
        let c = &e.controls[&cid];
        assert!(c.alive);
        assert_eq!(c.cells.len(), 1);
        assert!(e.handles[&id].was_alive);
        assert!(e.handles[&id].has_perm(perms::TP));
        assert!(!e.take_frames().is_empty());
    }

    #[test]
    fn test_pool_accounting_holds_across_ticks() {
        let mut e = quiet_engine(|c| {
            c.pellet.count = 200;
            c.eject.dispersion = 0.0;
        });
        let (_, big) = bot(&mut e);
        let (_, small) = bot(&mut e);
        let (_, doomed) = bot(&mut e);
        let eater = place(&mut e, big, 0.0, 0.0, 800.0);
        e.world.pool.get(eater).set_age(10_000.0);
        place(&mut e, small, 300.0, 0.0, 100.0);
        place(&mut e, doomed, -3000.0, -3000.0, 200.0);
        e.controls.get_mut(&big).unwrap().mouse = crate::geometry::Point::new(0.0, 2000.0);
        e.now = 2_000_000_000;

        let mut ejected = 0;
        for i in 0..20 {
            e.controls.get_mut(&big).unwrap().ejects = 1;
            if i == 3 {
                e.delay_kill(doomed, false);
            }
            e.tick(40.0);
            ejected = ejected.max(e.ejected.len());

            let pool = &e.world.pool;
            let (live, removing, free) = pool.census();
            assert_eq!(live + removing + free, pool.capacity());
            assert_eq!(live + removing, pool.count());
        }
        assert!(ejected > 0);
        assert!(!e.controls[&small].alive);
        assert!(e.controls[&doomed].cells.is_empty());
    }

    #[test]
    fn test_restart_clears_world_but_keeps_handles() {
        let mut e = quiet_engine(|_| {});
        let (b, cid) = bot(&mut e);
        place(&mut e, cid, 0.0, 0.0, 300.0);
        e.spawn_virus_at(100.0, 100.0);
        e.restart();
        assert_eq!(e.world.pool.count(), 0);
        assert!(e.viruses.is_empty());
        assert!(!e.controls[&cid].alive);
        assert!(e.handle(b).is_some());
    }
}
