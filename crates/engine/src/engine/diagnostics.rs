//! Tick timings and spatial query counters.

use std::fmt;

use super::Engine;

/// Tree depths tracked by the query counters and the histogram.
pub const QUERY_LEVELS: usize = 16;

/// Milliseconds spent in each tick phase.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickTimings {
    pub spawn_cells: f64,
    pub handle_io: f64,
    /// Control loop, actions and hooks of the I/O phase.
    pub io: [f64; 3],
    pub spawn_handles: f64,
    pub update_cells: f64,
    pub resolve: f64,
    /// Resolve passes 0-6 and the post-resolve pass.
    pub physics: [f64; 8],
}

impl TickTimings {
    pub fn total(&self) -> f64 {
        self.spawn_cells + self.handle_io + self.spawn_handles + self.update_cells + self.resolve
    }
}

impl fmt::Display for TickTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "spawn {:.2}ms, io {:.2}ms [{:.2}, {:.2}, {:.2}], handles {:.2}ms, update {:.2}ms, resolve {:.2}ms [",
            self.spawn_cells,
            self.handle_io,
            self.io[0],
            self.io[1],
            self.io[2],
            self.spawn_handles,
            self.update_cells,
            self.resolve
        )?;
        for (i, t) in self.physics.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{t:.2}")?;
        }
        f.write_str("]")
    }
}

/// Candidates visited and pairs that actually overlapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseQueries {
    pub total: u64,
    pub effective: u64,
}

impl PhaseQueries {
    pub fn efficiency(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.effective as f64 / self.total as f64 }
    }
}

/// Query counters of the last resolve. Level counters cover the
/// same-owner pass only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub phase0: PhaseQueries,
    pub phase1: PhaseQueries,
    pub levels: [u64; QUERY_LEVELS],
    pub level_hits: [u64; QUERY_LEVELS],
}

impl QueryStats {
    #[inline]
    pub(super) fn visit(&mut self, level: u32) {
        self.phase0.total += 1;
        if let Some(n) = self.levels.get_mut(level as usize) {
            *n += 1;
        }
    }

    #[inline]
    pub(super) fn hit(&mut self, level: u32) {
        self.phase0.effective += 1;
        if let Some(n) = self.level_hits.get_mut(level as usize) {
            *n += 1;
        }
    }

    pub(super) fn merge(&mut self, other: &QueryStats) {
        for (a, b) in [(&mut self.phase0, &other.phase0), (&mut self.phase1, &other.phase1)] {
            a.total += b.total;
            a.effective += b.effective;
        }
        for i in 0..QUERY_LEVELS {
            self.levels[i] += other.levels[i];
            self.level_hits[i] += other.level_hits[i];
        }
    }
}

impl Engine {
    pub fn timings(&self) -> &TickTimings {
        &self.timings
    }

    pub fn queries(&self) -> &QueryStats {
        &self.queries
    }

    /// Share of the last tick interval spent working.
    pub fn usage(&self) -> f64 {
        self.usage
    }

    /// Quadtree items per depth.
    pub fn tree_histogram(&self) -> Vec<u32> {
        self.world.tree.histogram(QUERY_LEVELS)
    }

    /// Bucket locks taken by pellet and hazard grid mutations.
    pub fn grid_locks(&self) -> (u64, u64) {
        (self.world.pellets.lock_count(), self.world.hazards.lock_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_counters() {
        let mut a = QueryStats::default();
        a.visit(0);
        a.visit(3);
        a.hit(3);
        let mut b = QueryStats::default();
        b.visit(3);
        b.visit(40);
        b.phase1.total = 5;
        b.phase1.effective = 1;

        a.merge(&b);
        assert_eq!(a.phase0.total, 4);
        assert_eq!(a.phase0.effective, 1);
        assert_eq!(a.levels[3], 2);
        assert_eq!(a.level_hits[3], 1);
        assert_eq!(a.levels.iter().sum::<u64>(), 3);
        assert_eq!(a.phase1.efficiency(), 0.2);
        assert_eq!(PhaseQueries::default().efficiency(), 0.0);
    }

    #[test]
    fn test_timings_display_lists_every_pass() {
        let mut t = TickTimings::default();
        t.physics[7] = 1.5;
        let s = t.to_string();
        assert!(s.starts_with("spawn 0.00ms"));
        assert!(s.ends_with("0.00, 1.50]"));
        assert_eq!(t.total(), 0.0);
    }
}
