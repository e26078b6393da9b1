//! The cell pool, its three indices and the single-cell physics helpers.

use std::ops::ControlFlow;

use rand::Rng;

use crate::cell::{Cell, CellFlags, CellId, kind};
use crate::config::ModeConfig;
use crate::control::Control;
use crate::geometry::{Aabb, Boost, IRect, Point, Rect};
use crate::pool::CellPool;
use crate::spatial::{Grid, QuadTree};

/// More ejected cells than this in a spawn box make it unsafe.
const MAX_EJECTS_NEAR_SPAWN: u32 = 10;
const MAX_TREE_DIM: i32 = 1 << 30;

/// A circle new spawns keep out of: one per live control, sized by mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Influence {
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

impl Influence {
    #[inline]
    pub fn intersects(&self, x: f64, y: f64, r: f64) -> bool {
        let (dx, dy) = (self.x - x, self.y - y);
        let sum = self.r + r;
        dx * dx + dy * dy < sum * sum
    }
}

pub(crate) struct World {
    pub config: ModeConfig,
    pub map: Rect,
    pub pool: CellPool,
    pub pellets: Grid,
    /// Viruses and ejected cells.
    pub hazards: Grid,
    pub tree: QuadTree,
}

impl World {
    pub fn new(config: ModeConfig) -> Self {
        let w = &config.world;
        let map = Rect::new(0.0, 0.0, w.map_hw, w.map_hh);
        let bound = w.map_hw.max(w.map_hh);
        let mut dim = 1;
        while f64::from(dim) < bound && dim < MAX_TREE_DIM {
            dim <<= 1;
        }

        Self {
            pool: CellPool::new(w.cell_limit),
            pellets: Grid::new(map, w.grid_pellet_size),
            hazards: Grid::new(map, w.grid_hazard_size),
            tree: QuadTree::new(
                IRect { x: 0, y: 0, hw: dim, hh: dim },
                w.quadtree_max_level,
                w.quadtree_max_items,
            ),
            map,
            config,
        }
    }

    /// Advance a cell along its boost. Returns whether it moved.
    pub fn boost(&self, cell: &Cell, dt: f64) -> bool {
        let cfg = &self.config.boost;
        let mut b = cell.boost();

        if cfg.new_algo {
            if b.d <= 0.0 {
                b.d = 0.0;
                cell.set_boost(b);
                return false;
            }
            let k = 0.0025 * cfg.factor;
            let old = b.d;
            b.d = (b.d - cfg.delay * dt).max(0.0);
            let dist = 100.0 * cfg.multi * ((k * old).exp() - (k * b.d).exp());
            cell.set_pos(cell.x() + b.x * dist, cell.y() + b.y * dist);
        } else {
            if b.d <= 1.0 {
                b.d = 1.0;
                cell.set_boost(b);
                return false;
            }
            let db = b.d * (cfg.factor * 0.0025) * dt;
            cell.set_pos(cell.x() + b.x * db, cell.y() + b.y * db);
            b.d -= db;
        }

        cell.set_boost(b);
        cell.add_flags(CellFlags::UPDATE);
        true
    }

    /// Keep the cell inside the map, reflecting its boost off the wall it hit.
    pub fn bounce(&self, cell: &Cell) {
        let r = cell.r();
        let inset = if self.config.world.strict_border { r } else { r / 2.0 };
        let (l, rr) = (inset - self.map.hw, self.map.hw - inset);
        let (b, t) = (inset - self.map.hh, self.map.hh - inset);

        let (mut x, mut y) = (cell.x(), cell.y());
        let mut boost = cell.boost();
        let mut hit = false;
        if x < l {
            x = l;
            boost.x = -boost.x;
            hit = true;
        } else if x > rr {
            x = rr;
            boost.x = -boost.x;
            hit = true;
        }
        if y < b {
            y = b;
            boost.y = -boost.y;
            hit = true;
        } else if y > t {
            y = t;
            boost.y = -boost.y;
            hit = true;
        }

        if hit {
            cell.set_pos(x, y);
            cell.set_boost(boost);
            cell.add_flags(CellFlags::WALL);
        }
    }

    /// Move a player cell towards `mouse`. Locked cells report their flags
    /// into `seen` before the move.
    pub fn move_cell(&self, cell: &Cell, dt: f64, mouse: Point, speed: f64, locked: bool, seen: &mut CellFlags) {
        if locked {
            seen.insert(cell.flags());
            cell.add_flags(CellFlags::LOCK);
        }
        cell.add_flags(CellFlags::UPDATE);

        let (dx, dy) = (mouse.x - cell.x(), mouse.y - cell.y());
        let d = (dx * dx + dy * dy).sqrt();
        if d < 1.0 {
            return;
        }
        let v = 1.76 * self.config.player.speed / 1.2 * cell.r().powf(-0.39) * speed;
        let m = v.min(d) * dt;
        cell.set_pos(cell.x() + dx / d * m, cell.y() + dy / d * m);
    }

    /// Split a child of radius `size` off `id` along the boost direction and
    /// index it. The parent keeps the remaining area.
    pub fn split_from(&self, id: CellId, size: f64, boost: Boost) -> CellId {
        let cell = self.pool.get(id);
        let r = cell.r();
        cell.set_r((r * r - size * size).sqrt());
        cell.add_flags(CellFlags::UPDATE);

        let dist = self.config.player.split_dist;
        let child = self
            .pool
            .alloc(cell.tag(), cell.x() + dist * boost.x, cell.y() + dist * boost.y, size);
        let c = self.pool.get(child);
        c.set_boost(boost);
        c.update_aabb();
        self.tree.insert(child, c);
        child
    }

    /// New virus at a point, indexed in the hazard grid.
    pub fn new_virus(&self, x: f64, y: f64, boost: Boost) -> CellId {
        let id = self.pool.alloc(kind::VIRUS, x, y, self.config.virus.size);
        let cell = self.pool.get(id);
        cell.set_boost(boost);
        self.hazards.insert(id, cell);
        id
    }

    /// Uniform point inside `bounds` clipped to the map, or anywhere on the map.
    pub fn random_point(&self, rng: &mut impl Rng, bounds: Option<Aabb>) -> (f64, f64) {
        let (hw, hh) = (self.map.hw, self.map.hh);
        let b = bounds.unwrap_or_else(|| self.map.to_aabb());
        (
            uniform(rng, b.l.clamp(-hw, hw), b.r.clamp(-hw, hw)),
            uniform(rng, b.b.clamp(-hh, hh), b.t.clamp(-hh, hh)),
        )
    }

    /// Whether the hazard grid leaves `aabb` free of viruses and dense ejecta.
    fn hazard_free(&self, aabb: &Aabb) -> bool {
        let mut ejects = 0;
        let mut clear = true;
        self.hazards.query(aabb, |id| {
            let tag = self.pool.get(id).tag();
            if tag & kind::EJECT_BIT != 0 {
                ejects += 1;
            }
            if tag == kind::VIRUS || ejects > MAX_EJECTS_NEAR_SPAWN {
                clear = false;
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
        clear
    }

    /// A random point whose box of half size `size * safe_mul` touches no
    /// tree cell and no hazard. `None` once the try budget is spent.
    pub fn safe_spawn_point(&self, rng: &mut impl Rng, size: f64, safe_mul: f64) -> Option<(f64, f64)> {
        let safe = size * safe_mul;
        for _ in 1..self.config.spawn.max_tries {
            let (x, y) = self.random_point(rng, None);
            let aabb = Rect::new(x, y, safe, safe).to_aabb();
            if self.tree.is_safe(&self.pool, &aabb) && self.hazard_free(&aabb) {
                return Some((x, y));
            }
        }
        None
    }

    /// Like [`World::safe_spawn_point`], but checks the influence circles
    /// instead of walking the tree.
    pub fn safe_spawn_from(
        &self,
        rng: &mut impl Rng,
        influences: &[Influence],
        size: f64,
        safe_mul: f64,
    ) -> Option<(f64, f64)> {
        let safe = size * safe_mul;
        for _ in 1..self.config.spawn.max_tries {
            let (x, y) = self.random_point(rng, None);
            if influences.iter().any(|i| i.intersects(x, y, safe)) {
                continue;
            }
            if self.hazard_free(&Rect::new(x, y, safe, safe).to_aabb()) {
                return Some((x, y));
            }
        }
        None
    }

    /// A point near `target`'s view. The search box widens with every try.
    pub fn spawn_near(
        &self,
        rng: &mut impl Rng,
        target: &Control,
        influences: &[Influence],
        size: f64,
        avoid_center: bool,
    ) -> Option<(f64, f64)> {
        let view = target.viewport;
        let (vx, vy) = if view.to_aabb().contains_point(target.mouse.x, target.mouse.y) {
            (target.mouse.x, target.mouse.y)
        } else {
            (view.x, view.y)
        };

        let min = self.config.player.view_min;
        let b = &target.aabb;
        let (f1, f2) = (min.max(1.2 * (vx - b.l)), min.max(1.2 * (b.r - vx)));
        let (f3, f4) = (min.max(1.2 * (vy - b.b)), min.max(1.2 * (b.t - vy)));
        let avoid = target.score * 100.0;
        let tries = f64::from(self.config.spawn.max_tries);

        for i in 1..self.config.spawn.max_tries {
            let f = 0.8 + 0.2 * f64::from(i) / tries;
            let bounds = Aabb {
                l: vx - f * f1,
                r: vx + f * f2,
                b: vy - f * f3,
                t: vy + f * f4,
            };
            let (x, y) = self.random_point(rng, Some(bounds));
            if avoid_center {
                let (dx, dy) = (view.x - x, view.y - y);
                if dx * dx + dy * dy < avoid {
                    continue;
                }
            }
            if influences.iter().any(|i| i.intersects(x, y, size)) {
                continue;
            }
            if self.hazard_free(&Rect::new(x, y, size, size).to_aabb()) {
                return Some((x, y));
            }
        }
        None
    }
}

#[inline]
fn uniform(rng: &mut impl Rng, lo: f64, hi: f64) -> f64 {
    if lo < hi { rng.random_range(lo..hi) } else { lo }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn world(half: f64) -> World {
        let mut config = ModeConfig::preset("ffa").unwrap();
        config.world.map_hw = half;
        config.world.map_hh = half;
        config.world.cell_limit = 256;
        config.world.grid_pellet_size = 8;
        config.world.grid_hazard_size = 8;
        World::new(config)
    }

    #[test]
    fn test_virus_makes_every_point_unsafe() {
        let w = world(100.0);
        w.new_virus(0.0, 0.0, Boost::default());
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(w.safe_spawn_point(&mut rng, 10.0, 100.0), None);
        assert_eq!(w.safe_spawn_from(&mut rng, &[], 10.0, 100.0), None);
    }

    #[test]
    fn test_tree_cells_block_spawn_but_not_influence_search() {
        let w = world(100.0);
        let id = w.pool.alloc(3, 0.0, 0.0, 50.0);
        w.pool.get(id).update_aabb();
        w.tree.insert(id, w.pool.get(id));
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(w.safe_spawn_point(&mut rng, 10.0, 100.0), None);

        let (x, y) = w.safe_spawn_from(&mut rng, &[], 10.0, 1.0).unwrap();
        assert!(x.abs() <= 100.0 && y.abs() <= 100.0);
        let blocker = Influence { x: 0.0, y: 0.0, r: 1000.0 };
        assert_eq!(w.safe_spawn_from(&mut rng, &[blocker], 10.0, 1.0), None);
    }

    #[test]
    fn test_old_boost_decays_linearly() {
        let w = world(5000.0);
        let id = w.pool.alloc(3, 0.0, 0.0, 100.0);
        let cell = w.pool.get(id);
        cell.set_boost(Boost::new(1.0, 0.0, 800.0));
        assert!(w.boost(cell, 40.0));
        assert!((cell.boost().d - 720.0).abs() < 1e-9);
        assert!((cell.x() - 80.0).abs() < 1e-9);
        assert!(cell.flags().contains(CellFlags::UPDATE));

        cell.set_boost(Boost::new(1.0, 0.0, 0.5));
        assert!(!w.boost(cell, 40.0));
        assert_eq!(cell.boost().d, 1.0);
    }

    #[test]
    fn test_new_boost_integrates_exponential() {
        let mut w = world(5000.0);
        w.config.boost.new_algo = true;
        w.config.boost.factor = 1.0;
        w.config.boost.delay = 1.0;
        w.config.boost.multi = 1.0;
        let id = w.pool.alloc(3, 0.0, 0.0, 100.0);
        let cell = w.pool.get(id);
        cell.set_boost(Boost::new(0.0, 1.0, 100.0));
        assert!(w.boost(cell, 40.0));
        let expected = 100.0 * ((0.25f64).exp() - (0.15f64).exp());
        assert!((cell.y() - expected).abs() < 1e-9);
        assert_eq!(cell.boost().d, 60.0);
    }

    #[test]
    fn test_bounce_reflects_boost() {
        let w = world(1000.0);
        let id = w.pool.alloc(3, 990.0, 0.0, 100.0);
        let cell = w.pool.get(id);
        cell.set_boost(Boost::new(1.0, 0.0, 50.0));
        w.bounce(cell);
        assert_eq!(cell.x(), 950.0);
        assert_eq!(cell.boost().x, -1.0);
        assert!(cell.flags().contains(CellFlags::WALL));
    }

    #[test]
    fn test_split_from_conserves_area() {
        let w = world(5000.0);
        let id = w.pool.alloc(3, 0.0, 0.0, 400.0);
        w.pool.get(id).update_aabb();
        w.tree.insert(id, w.pool.get(id));
        let size = 400.0 * std::f64::consts::FRAC_1_SQRT_2;
        let child = w.split_from(id, size, Boost::new(0.0, 1.0, 800.0));

        let (p, c) = (w.pool.get(id), w.pool.get(child));
        assert!((p.r() * p.r() + c.r() * c.r() - 160000.0).abs() < 1e-6);
        assert_eq!(c.tag(), 3);
        assert_eq!((c.x(), c.y()), (0.0, w.config.player.split_dist));
        assert_eq!(c.boost().d, 800.0);
        assert_eq!(w.tree.level_of(c), Some(0));
    }
}
