//! Uniform bucket grid.
//!
//! Buckets are addressed by column `l..=r` and row `t..=b`, with row 0 at the
//! top of the map. A cell is pushed into every bucket its box touches and
//! remembers that range, so removal never recomputes the box.

use std::ops::ControlFlow;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering::Relaxed};

use crate::cell::{Cell, CellId};
use crate::geometry::{Aabb, GridRange, Rect};
use crate::lock;

pub struct Grid {
    bounds: Aabb,
    dim: i32,
    bin_w: f64,
    bin_h: f64,
    buckets: Vec<Mutex<Vec<CellId>>>,
    count: AtomicI64,
    locks: AtomicU64,
}

impl Grid {
    pub fn new(map: Rect, dim: u32) -> Self {
        let dim = dim.max(1) as i32;
        Self {
            bounds: map.to_aabb(),
            dim,
            bin_w: map.hw * 2.0 / f64::from(dim),
            bin_h: map.hh * 2.0 / f64::from(dim),
            buckets: (0..dim * dim).map(|_| Mutex::new(Vec::new())).collect(),
            count: AtomicI64::new(0),
            locks: AtomicU64::new(0),
        }
    }

    /// Cells currently indexed.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(Relaxed).max(0) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket locks taken by mutations since creation.
    #[inline]
    pub fn lock_count(&self) -> u64 {
        self.locks.load(Relaxed)
    }

    #[inline]
    fn bucket(&self, col: i32, row: i32) -> &Mutex<Vec<CellId>> {
        &self.buckets[(col * self.dim + row) as usize]
    }

    fn range_of(&self, l: f64, r: f64, b: f64, t: f64) -> GridRange {
        let last = self.dim - 1;
        GridRange {
            l: (((l - self.bounds.l) / self.bin_w).floor() as i32).max(0),
            r: (((r - self.bounds.l) / self.bin_w).floor() as i32).min(last),
            t: (((self.bounds.t - t) / self.bin_h).floor() as i32).max(0),
            b: (((self.bounds.t - b) / self.bin_h).floor() as i32).min(last),
        }
    }

    #[inline]
    fn range_of_cell(&self, cell: &Cell) -> GridRange {
        let (x, y, r) = (cell.x(), cell.y(), cell.r());
        self.range_of(x - r, x + r, y - r, y + r)
    }

    pub fn insert(&self, id: CellId, cell: &Cell) {
        let range = self.range_of_cell(cell);
        cell.set_range(range);
        for col in range.l..=range.r {
            for row in range.t..=range.b {
                self.locks.fetch_add(1, Relaxed);
                lock(self.bucket(col, row)).push(id);
            }
        }
        self.count.fetch_add(1, Relaxed);
    }

    pub fn remove(&self, id: CellId, cell: &Cell) {
        let range = cell.range();
        for col in range.l..=range.r {
            for row in range.t..=range.b {
                self.locks.fetch_add(1, Relaxed);
                let mut bucket = lock(self.bucket(col, row));
                if let Some(pos) = bucket.iter().position(|&other| other == id) {
                    bucket.remove(pos);
                }
            }
        }
        self.count.fetch_sub(1, Relaxed);
    }

    /// Move the cell if its bucket range changed. Returns whether it moved.
    pub fn update(&self, id: CellId, cell: &Cell) -> bool {
        if self.range_of_cell(cell) == cell.range() {
            return false;
        }
        self.remove(id, cell);
        self.insert(id, cell);
        true
    }

    fn visit(&self, range: GridRange, mut cb: impl FnMut(CellId) -> ControlFlow<()>) {
        let mut scratch = Vec::new();
        for col in range.l..=range.r {
            for row in range.t..=range.b {
                scratch.clear();
                scratch.extend_from_slice(&lock(self.bucket(col, row)));
                for &other in &scratch {
                    if cb(other).is_break() {
                        return;
                    }
                }
            }
        }
    }

    /// Visit every cell sharing a bucket with `id`, using its stored range.
    /// Cells spanning several buckets may be visited more than once.
    pub fn query_around(&self, id: CellId, cell: &Cell, mut cb: impl FnMut(CellId) -> ControlFlow<()>) {
        self.visit(cell.range(), |other| if other == id { ControlFlow::Continue(()) } else { cb(other) });
    }

    /// Visit every cell in the buckets overlapping `aabb`.
    pub fn query(&self, aabb: &Aabb, cb: impl FnMut(CellId) -> ControlFlow<()>) {
        if aabb.r < aabb.l || aabb.t < aabb.b {
            return;
        }
        self.visit(self.range_of(aabb.l, aabb.r, aabb.b, aabb.t), cb);
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            let bucket = bucket.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
            bucket.clear();
            bucket.shrink_to_fit();
        }
        self.count.store(0, Relaxed);
    }
}

impl std::fmt::Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grid")
            .field("dim", &self.dim)
            .field("len", &self.len())
            .finish()
    }
}
