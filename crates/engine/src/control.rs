//! Controls: the owner of a set of cells.
//!
//! A control's id doubles as the type tag of every cell it owns. A handle
//! drives at most one control; a control outlives its handle until its last
//! cell is gone.

use std::f64::consts::PI;

use crate::cell::CellId;
use crate::geometry::{Aabb, Point, Rect};
use crate::pool::CellPool;

const LINE_ANGLE_THRESH: f64 = 0.1;
const VIEW_EXPAND: f64 = 1.1;
const CELL_FACTOR_BASE: f64 = 100.0;
const FACTOR_EXPONENT: f64 = 0.05;

/// Per-control multipliers and capabilities. Special bots and game modes
/// tune these.
#[derive(Debug, Clone, PartialEq)]
pub struct Overrides {
    pub can_spawn: bool,
    pub can_auto: bool,
    pub can_eat_pellet: bool,
    pub can_merge: bool,
    pub can_colli: bool,
    /// Merge as soon as the collision delay passes.
    pub instant: bool,
    pub view: f64,
    pub spawn: f64,
    pub decay: f64,
    pub speed: f64,
    pub eject: f64,
    pub boost: f64,
    pub min_size: f64,
    pub max_size: f64,
    /// Cell cap, negative for the mode default.
    pub cells: i32,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            can_spawn: true,
            can_auto: true,
            can_eat_pellet: true,
            can_merge: true,
            can_colli: true,
            instant: false,
            view: 1.0,
            spawn: 1.0,
            decay: 1.0,
            speed: 1.0,
            eject: 1.0,
            boost: 1.0,
            min_size: 0.0,
            max_size: 1e8,
            cells: -1,
        }
    }
}

impl Overrides {
    /// Restore the multipliers. The `can_*` physics switches other than
    /// `can_spawn` are left alone.
    pub fn reset(&mut self) {
        *self = Self {
            can_auto: self.can_auto,
            can_eat_pellet: self.can_eat_pellet,
            can_merge: self.can_merge,
            can_colli: self.can_colli,
            ..Self::default()
        };
    }

    /// Cell cap with the mode default applied.
    #[inline]
    pub fn max_cells(&self, default: u32) -> usize {
        if self.cells > 0 { self.cells as usize } else { default as usize }
    }
}

/// A queued split burst: remaining splits and ticks since it was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitAttempt {
    pub attempt: u8,
    pub tick: u8,
}

/// Line lock state, as sent to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LineLock {
    #[default]
    Off = 0,
    Free = 1,
    Horizontal = 2,
    Vertical = 3,
}

impl LineLock {
    #[inline]
    pub fn is_locked(self) -> bool {
        self != LineLock::Off
    }
}

#[derive(Debug, Clone)]
pub struct Control {
    /// Id, also the tag stamped on owned cells.
    pub id: u16,
    /// Handle driving this control, if any.
    pub handle: Option<crate::HandleId>,
    pub alive: bool,
    /// A spawn was requested and not yet served.
    pub spawning: bool,
    pub eject_macro: bool,
    pub auto_respawn: bool,
    pub line_lock: LineLock,
    /// `a`, `b`, `c` of the locked line `ax + by + c = 0`.
    pub(crate) line_eq: [f64; 3],
    /// `1 / (a² + b²)`.
    pub(crate) line_inv: f64,
    /// Target point in world space.
    pub mouse: Point,
    pub splits: u16,
    pub split_attempts: Vec<SplitAttempt>,
    pub ejects: u16,
    pub last_spawn_req: u64,
    pub last_split: u64,
    pub last_eject: u64,
    pub last_popped: u64,
    pub last_spawned: u64,
    pub last_dead: u64,
    pub overrides: Overrides,
    pub viewport: Rect,
    /// Shrinks under the anti-camp penalty.
    pub viewport_factor: f64,
    /// Union of the owned cell boxes.
    pub aabb: Aabb,
    /// Σr² / 100 over owned cells.
    pub score: f64,
    pub kills: u32,
    pub cells: Vec<CellId>,
    /// Owned cells by radius, largest first. Rebuilt in resolve.
    pub(crate) sorted: Vec<CellId>,
}

impl Control {
    pub fn new(id: u16, min_view: f64) -> Self {
        Self {
            id,
            handle: None,
            alive: false,
            spawning: false,
            eject_macro: false,
            auto_respawn: false,
            line_lock: LineLock::Off,
            line_eq: [0.0; 3],
            line_inv: 0.0,
            mouse: Point::ZERO,
            splits: 0,
            split_attempts: Vec::new(),
            ejects: 0,
            last_spawn_req: 0,
            last_split: 0,
            last_eject: 0,
            last_popped: 0,
            last_spawned: 0,
            last_dead: 0,
            overrides: Overrides::default(),
            viewport: Rect::new(0.0, 0.0, min_view, min_view),
            viewport_factor: 1.0,
            aabb: Aabb::default(),
            score: 0.0,
            kills: 0,
            cells: Vec::new(),
            sorted: Vec::new(),
        }
    }

    /// Lock movement to the line through the single cell and the mouse,
    /// snapping to an axis when close.
    pub fn lock_line(&mut self, pool: &CellPool) {
        let [only] = self.cells[..] else {
            return;
        };
        let cell = pool.get(only);
        let (mut x1, mut y1) = (self.mouse.x, self.mouse.y);
        let (x2, y2) = (cell.x(), cell.y());
        let a = (x2 - x1).atan2(y1 - y2);

        self.line_lock = if (a - PI * 0.5).abs() < LINE_ANGLE_THRESH || (a + PI * 0.5).abs() < LINE_ANGLE_THRESH {
            y1 = y2;
            LineLock::Horizontal
        } else if (a - PI).abs() < LINE_ANGLE_THRESH || a.abs() < LINE_ANGLE_THRESH {
            x1 = x2;
            LineLock::Vertical
        } else {
            LineLock::Free
        };

        self.line_eq = [y1 - y2, x2 - x1, x1 * y2 - x2 * y1];
        self.line_inv = 1.0 / (self.line_eq[0] * self.line_eq[0] + self.line_eq[1] * self.line_eq[1]);
    }

    #[inline]
    pub fn unlock_line(&mut self) {
        self.line_lock = LineLock::Off;
    }

    pub fn toggle_lock(&mut self, pool: &CellPool) {
        if self.line_lock.is_locked() {
            self.unlock_line();
        } else {
            self.lock_line(pool);
        }
    }

    /// Project a point onto the locked line.
    #[inline]
    pub fn project(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c] = self.line_eq;
        (
            (b * (b * x - a * y) - a * c) * self.line_inv,
            (a * (-b * x + a * y) - b * c) * self.line_inv,
        )
    }

    /// Reset per-life state after a successful spawn at `now`.
    pub fn after_spawn(&mut self, now: u64) {
        self.spawning = false;
        self.eject_macro = false;
        self.line_lock = LineLock::Off;
        self.auto_respawn = false;
        self.ejects = 0;
        self.splits = 0;
        self.score = 0.0;
        self.kills = 0;
        self.last_spawned = now;
        self.last_dead = 0;
    }

    /// Whether the control wants a spawn. A control that may not spawn but
    /// is alive queues itself for a kill in `kills`.
    pub fn can_spawn(&self, kills: &mut Vec<(u16, bool)>) -> bool {
        if !self.overrides.can_spawn {
            if self.alive {
                kills.push((self.id, false));
            }
            return false;
        }
        self.spawning || (!self.alive && self.auto_respawn)
    }

    /// Ask for a respawn. A live control is killed first, leaving a remnant.
    pub fn request_spawn(&mut self, kills: &mut Vec<(u16, bool)>) {
        self.spawning = true;
        if self.can_spawn(kills) && self.alive {
            kills.push((self.id, true));
        }
    }

    /// Recompute score, box and viewport from the owned cells.
    pub fn calculate_viewport(&mut self, pool: &CellPool, min_view: f64, view_scale: f64) {
        let (mut x, mut y, mut size, mut score) = (0.0, 0.0, 0.0, 0.0);
        let mut aabb = Aabb {
            l: f64::MAX,
            r: -f64::MAX,
            b: f64::MAX,
            t: -f64::MAX,
        };

        for &id in &self.cells {
            let cell = pool.get(id);
            let sqr = cell.r() * cell.r();
            x += cell.x() * sqr;
            y += cell.y() * sqr;
            aabb = aabb.union(&cell.aabb().to_f64());
            score += sqr * 0.01;
            size += sqr;
        }

        self.score = score;
        if score == 0.0 || size <= 0.0 {
            return;
        }

        let factor = (self.cells.len() as f64 + CELL_FACTOR_BASE).powf(FACTOR_EXPONENT) * 0.01;
        let factored = self.viewport_factor * (factor + 1.0) * (score * 100.0).sqrt();
        let (vx, vy) = (x / size, y / size);
        let base = factored.max(min_view) * view_scale;
        let hw = base
            .max((vx - aabb.l) * VIEW_EXPAND)
            .max((aabb.r - vx) * VIEW_EXPAND);
        let hh = base
            .max((vy - aabb.b) * VIEW_EXPAND)
            .max((aabb.t - vy) * VIEW_EXPAND);

        self.aabb = aabb;
        self.viewport = Rect::new(vx, vy, hw * self.overrides.view, hh * self.overrides.view);
    }

    pub fn reset_timer(&mut self) {
        self.last_split = 0;
        self.last_eject = 0;
        self.last_popped = 0;
        self.last_spawned = 0;
    }
}
