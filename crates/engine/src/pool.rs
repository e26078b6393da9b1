//! Fixed-capacity cell storage.
//!
//! Slots are claimed with a compare-and-swap on the flag word, starting at a
//! rotating cursor, so concurrent allocation needs no global lock. The count
//! is the number of slots with `EXIST` set, pending removals included.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering::Relaxed};

use tracing::error;

use crate::cell::{Cell, CellFlags, CellId, CellState};

pub struct CellPool {
    cells: Box<[Cell]>,
    next: AtomicU32,
    count: AtomicUsize,
}

impl CellPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: (0..capacity).map(|_| Cell::default()).collect(),
            next: AtomicU32::new(0),
            count: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Slots currently claimed.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Relaxed)
    }

    #[inline]
    pub fn get(&self, id: CellId) -> &Cell {
        &self.cells[id as usize]
    }

    #[inline]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Claim a free slot and initialise it. Running out of slots means the
    /// budget accounting is broken, so the process aborts.
    pub fn alloc(&self, tag: u16, x: f64, y: f64, r: f64) -> CellId {
        let capacity = self.cells.len();
        if self.count.fetch_add(1, Relaxed) >= capacity {
            error!("Cell pool exhausted ({capacity} slots)");
            std::process::abort();
        }

        let mut id = self.next.load(Relaxed) as usize % capacity;
        loop {
            let cell = &self.cells[id];
            if cell.flags().bits() == 0 && cell.cas_flags(CellFlags::empty(), CellFlags::EXIST) {
                break;
            }
            id += 1;
            if id >= capacity {
                id = 0;
            }
        }

        self.next.store(id as u32, Relaxed);
        let cell = &self.cells[id];
        cell.init(tag, x, y, r);
        id as CellId
    }

    /// Zero the record. The caller removes it from its index first.
    pub fn free(&self, id: CellId) {
        let cell = &self.cells[id as usize];
        if !cell.exists() {
            return;
        }
        cell.clear();
        self.count.fetch_sub(1, Relaxed);
    }

    /// Zero every slot.
    pub fn reset(&mut self) {
        for cell in self.cells.iter() {
            cell.clear();
        }
        self.next.store(0, Relaxed);
        self.count.store(0, Relaxed);
    }

    /// Recount after the records were overwritten in bulk.
    pub(crate) fn recount(&self) {
        let live = self.cells.iter().filter(|c| c.exists()).count();
        self.count.store(live, Relaxed);
    }

    /// Counts of (live, removing, free) slots.
    pub fn census(&self) -> (usize, usize, usize) {
        self.cells.iter().fold((0, 0, 0), |(l, p, f), c| match c.state() {
            CellState::Live => (l + 1, p, f),
            CellState::Removing => (l, p + 1, f),
            CellState::Free => (l, p, f + 1),
        })
    }
}

impl std::fmt::Debug for CellPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellPool")
            .field("capacity", &self.cells.len())
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::kind;
    use std::collections::HashSet;

    #[test]
    fn test_alloc_free_accounting() {
        let pool = CellPool::new(8);
        let a = pool.alloc(1, 0.0, 0.0, 10.0);
        let b = pool.alloc(kind::PELLET, 5.0, 5.0, 1.0);
        assert_ne!(a, b);
        assert_eq!(pool.count(), 2);
        pool.get(b).add_flags(CellFlags::REMOVE);
        assert_eq!(pool.census(), (1, 1, 6));

        pool.free(b);
        pool.free(b);
        assert_eq!(pool.count(), 1);
        let (live, removing, free) = pool.census();
        assert_eq!(live + removing + free, pool.capacity());
        assert_eq!(pool.get(b).state(), CellState::Free);
        assert_eq!(pool.get(b).r(), 0.0);
    }

    #[test]
    fn test_alloc_wraps_around() {
        let pool = CellPool::new(3);
        let ids: Vec<_> = (0..3).map(|i| pool.alloc(1, f64::from(i), 0.0, 1.0)).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        pool.free(0);
        assert_eq!(pool.alloc(2, 0.0, 0.0, 1.0), 0);
        assert_eq!(pool.get(0).tag(), 2);
    }

    #[test]
    fn test_concurrent_alloc_distinct() {
        let pool = CellPool::new(400);
        let ids: Vec<CellId> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| (0..100).map(|_| pool.alloc(1, 0.0, 0.0, 1.0)).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 400);
        assert_eq!(pool.count(), 400);
    }
}
