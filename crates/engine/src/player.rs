//! Human player input and per-viewer visibility cache.

use std::collections::HashMap;
use std::ops::ControlFlow;

use bytes::Bytes;
use fixedbitset::FixedBitSet;
use protocol::{CachedCell, DeltaEncoder, ViewHeader};

use crate::cell::{CellFlags, CellId, kind};
use crate::control::Control;
use crate::geometry::{Aabb, Point};
use crate::pool::CellPool;
use crate::spatial::{Grid, QuadTree};

/// Views larger than this on a side skip pellets.
const SKIP_PELLET_VIEW: f64 = 25000.0;

/// One tab's pending input, as last written by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Input {
    pub eject_macro: bool,
    pub spawn: bool,
    /// Toggle the line lock.
    pub line: bool,
    pub splits: u8,
    pub ejects: u8,
    pub mouse_x: i32,
    pub mouse_y: i32,
}

/// A cell as the viewer last saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: CellId,
    pub cell: CachedCell,
}

impl CacheEntry {
    fn of(pool: &CellPool, id: CellId) -> Self {
        let c = pool.get(id);
        Self {
            id,
            cell: CachedCell::quantize(c.tag(), c.x(), c.y(), c.r()),
        }
    }
}

/// Everything a frame is built from besides the viewer's own cache.
pub(crate) struct FrameSource<'a> {
    pub pool: &'a CellPool,
    pub pellets: &'a Grid,
    pub hazards: &'a Grid,
    pub tree: &'a QuadTree,
    pub header: ViewHeader,
    pub viewports: &'a [Aabb],
    pub show_perks: bool,
    /// A cell outside every index that is always visible.
    pub extra: Option<CellId>,
}

#[derive(Debug, Default)]
pub struct PlayerView {
    pub inputs: [Input; 2],
    pub active_tab: u8,
    /// Cells sent last frame, in wire order.
    pub(crate) cache: Vec<CacheEntry>,
    last_visible: FixedBitSet,
    curr_visible: FixedBitSet,
}

impl PlayerView {
    pub fn new(capacity: usize) -> Self {
        Self {
            last_visible: FixedBitSet::with_capacity(capacity),
            curr_visible: FixedBitSet::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn cache(&self) -> &[CacheEntry] {
        &self.cache
    }

    /// Forget everything sent so far. The next frame starts from scratch.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.cache.shrink_to_fit();
    }

    /// Apply the pending input of `tab` to its control. `any_alive` is
    /// whether any tab of the player is alive; a dead player only forwards
    /// spawn requests.
    pub(crate) fn sync_tab(
        &mut self,
        tab: usize,
        any_alive: bool,
        control: &mut Control,
        pool: &CellPool,
        now: u64,
        kills: &mut Vec<(u16, bool)>,
    ) {
        let input = &mut self.inputs[tab];
        if !any_alive {
            if input.spawn {
                input.spawn = false;
                control.request_spawn(kills);
                control.last_spawn_req = now;
            }
            return;
        }

        if !control.alive && tab == usize::from(self.active_tab) {
            control.request_spawn(kills);
            control.last_spawn_req = now;
        }

        control.splits = u16::from(input.splits);
        control.ejects = u16::from(input.ejects);
        control.eject_macro = input.eject_macro;

        if input.spawn {
            control.request_spawn(kills);
            control.last_spawn_req = now;
        }
        if input.line {
            control.toggle_lock(pool);
        }
        control.mouse = Point::new(f64::from(input.mouse_x), f64::from(input.mouse_y));

        input.splits = 0;
        input.ejects = 0;
        input.spawn = false;
        input.line = false;
    }

    /// Drop the input of a tab that has no control behind it.
    pub(crate) fn clear_tab(&mut self, tab: usize) {
        self.inputs[tab] = Input::default();
    }

    /// Encode the difference between the last frame and what the viewports
    /// show now, and remember the new visible set.
    pub(crate) fn encode_frame(&mut self, src: &FrameSource<'_>) -> Bytes {
        let capacity = src.pool.capacity();
        if self.last_visible.len() < capacity {
            self.last_visible.grow(capacity);
            self.curr_visible.grow(capacity);
        }
        self.last_visible.clear();
        self.curr_visible.clear();
        for entry in &self.cache {
            self.last_visible.insert(entry.id as usize);
        }

        let mut added = Vec::new();
        let (last, curr) = (&self.last_visible, &mut self.curr_visible);
        let mut see = |id: CellId| {
            if id as usize >= capacity || curr.put(id as usize) {
                return;
            }
            if !last.contains(id as usize) && !src.pool.get(id).flags().contains(CellFlags::REMOVE) {
                added.push(CacheEntry::of(src.pool, id));
            }
        };

        for aabb in src.viewports {
            src.hazards.query(aabb, |id| {
                if src.pool.get(id).age() != 0.0 {
                    see(id);
                }
                ControlFlow::Continue(())
            });
            if aabb.area() <= SKIP_PELLET_VIEW * SKIP_PELLET_VIEW {
                src.pellets.query(aabb, |id| {
                    see(id);
                    ControlFlow::Continue(())
                });
            }
            src.tree.query_box(src.pool, aabb, |id| {
                if src.show_perks || !kind::is_perk(src.pool.get(id).tag()) {
                    see(id);
                }
            });
            if let Some(extra) = src.extra {
                see(extra);
            }
        }

        let lookup: HashMap<CellId, usize> = self.cache.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        let mut enc = DeltaEncoder::new(&src.header, self.cache.len() as u32);
        let mut kept = Vec::with_capacity(self.cache.len() + added.len());

        for mut entry in self.cache.drain(..) {
            let cell = src.pool.get(entry.id);
            let flags = cell.flags();
            if flags.contains(CellFlags::REMOVE) {
                let eater = cell
                    .eaten_by()
                    .and_then(|e| lookup.get(&e))
                    .and_then(|&i| u16::try_from(i).ok());
                match eater {
                    Some(index) => enc.eat(index),
                    None => enc.remove(),
                }
            } else if flags.contains(CellFlags::EXIST)
                && cell.tag() == entry.cell.kind
                && self.curr_visible.contains(entry.id as usize)
            {
                enc.update(&mut entry.cell, CachedCell::quantize(cell.tag(), cell.x(), cell.y(), cell.r()));
                kept.push(entry);
            } else {
                enc.remove();
            }
        }

        let fresh: Vec<CachedCell> = added.iter().map(|e| e.cell).collect();
        kept.extend(added);
        self.cache = kept;
        enc.finish(&fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{IRect, Rect};
    use protocol::DeltaDecoder;

    struct World {
        pool: CellPool,
        pellets: Grid,
        hazards: Grid,
        tree: QuadTree,
    }

    fn world() -> World {
        let map = Rect::new(0.0, 0.0, 5000.0, 5000.0);
        World {
            pool: CellPool::new(64),
            pellets: Grid::new(map, 8),
            hazards: Grid::new(map, 8),
            tree: QuadTree::new(IRect { x: 0, y: 0, hw: 5000, hh: 5000 }, 8, 16),
        }
    }

    fn frame(w: &World, view: &mut PlayerView, show_perks: bool) -> Bytes {
        let viewports = [Aabb { l: -2000.0, r: 2000.0, b: -2000.0, t: 2000.0 }];
        view.encode_frame(&FrameSource {
            pool: &w.pool,
            pellets: &w.pellets,
            hazards: &w.hazards,
            tree: &w.tree,
            header: ViewHeader::default(),
            viewports: &viewports,
            show_perks,
            extra: None,
        })
    }

    fn tree_cell(w: &World, tag: u16, x: f64, y: f64, r: f64) -> CellId {
        let id = w.pool.alloc(tag, x, y, r);
        w.pool.get(id).update_aabb();
        w.tree.insert(id, w.pool.get(id));
        id
    }

    #[test]
    fn test_frames_track_visibility() {
        let w = world();
        let mut view = PlayerView::new(64);
        let mut dec = DeltaDecoder::new();

        let player = tree_cell(&w, 3, 100.0, 100.0, 200.0);
        let pellet = w.pool.alloc(kind::PELLET, -500.0, 300.0, 20.0);
        w.pellets.insert(pellet, w.pool.get(pellet));
        let perk = tree_cell(&w, kind::EXP, 900.0, 900.0, 250.0);
        let far = tree_cell(&w, 4, 4500.0, 4500.0, 100.0);

        let out = dec.apply(frame(&w, &mut view, false)).unwrap();
        assert_eq!(out.added, 2);
        let ids: Vec<_> = view.cache().iter().map(|e| e.id).collect();
        assert!(ids.contains(&player) && ids.contains(&pellet));
        assert!(!ids.contains(&perk) && !ids.contains(&far));

        w.pool.get(player).set_pos(160.0, 40.0);
        w.pool.get(player).set_r(230.0);
        let out = dec.apply(frame(&w, &mut view, true)).unwrap();
        assert_eq!(out.added, 1);
        assert_eq!(out.removed, 0);
        let seen = dec.cells().iter().find(|c| c.kind == 3).unwrap();
        assert_eq!((seen.x, seen.y, seen.r), (80, 20, 115));
    }

    #[test]
    fn test_eaten_cell_reports_eater_index() {
        let w = world();
        let mut view = PlayerView::new(64);
        let mut dec = DeltaDecoder::new();

        let big = tree_cell(&w, 3, 0.0, 0.0, 300.0);
        let small = tree_cell(&w, 5, 250.0, 0.0, 100.0);
        dec.apply(frame(&w, &mut view, false)).unwrap();

        w.pool.get(small).add_flags(CellFlags::REMOVE);
        w.pool.get(small).set_eaten_by(big);
        let out = dec.apply(frame(&w, &mut view, false)).unwrap();
        assert_eq!(out.eaten.len(), 1);
        assert_eq!(out.eaten[0].eater.kind, 3);
        assert_eq!(out.eaten[0].victim.kind, 5);
        assert_eq!(view.cache().len(), 1);

        for id in [big, small] {
            w.tree.remove(id, w.pool.get(id));
            w.pool.free(id);
        }
        let out = dec.apply(frame(&w, &mut view, false)).unwrap();
        assert_eq!(out.removed, 1);
        assert!(dec.cells().is_empty());
    }

    #[test]
    fn test_dead_player_only_forwards_spawn() {
        let pool = CellPool::new(4);
        let mut view = PlayerView::default();
        let mut control = Control::new(1, 4000.0);
        let mut kills = Vec::new();
        view.inputs[0] = Input {
            splits: 3,
            spawn: true,
            mouse_x: 50,
            ..Input::default()
        };
        view.sync_tab(0, false, &mut control, &pool, 77, &mut kills);
        assert!(control.spawning);
        assert_eq!(control.last_spawn_req, 77);
        assert_eq!(control.splits, 0);
        assert_eq!(control.mouse, Point::ZERO);
        assert_eq!(view.inputs[0].splits, 3);
    }

    #[test]
    fn test_alive_tab_copies_and_consumes_input() {
        let pool = CellPool::new(4);
        let mut view = PlayerView::default();
        let mut control = Control::new(1, 4000.0);
        control.alive = true;
        let mut kills = Vec::new();
        view.inputs[0] = Input {
            eject_macro: true,
            splits: 2,
            ejects: 4,
            mouse_x: -300,
            mouse_y: 120,
            ..Input::default()
        };
        view.sync_tab(0, true, &mut control, &pool, 5, &mut kills);
        assert_eq!(control.splits, 2);
        assert_eq!(control.ejects, 4);
        assert!(control.eject_macro);
        assert_eq!(control.mouse, Point::new(-300.0, 120.0));
        assert_eq!(view.inputs[0].splits, 0);
        assert!(view.inputs[0].eject_macro);
        assert!(kills.is_empty());
    }
}
