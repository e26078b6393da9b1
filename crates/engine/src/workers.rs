//! Worker pool for the parallel tick phases.
//!
//! Each phase hands the pool a batch of jobs and blocks until all of them
//! are done. Workers pull from one shared queue and fold results into a
//! per-worker accumulator that is returned to the caller for merging.

use std::sync::Mutex;
use std::thread;

use tracing::warn;

use crate::lock;

/// Fixed-size pool of scoped OS threads.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// `workers == 0` runs every job on the calling thread.
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` over every item and return one accumulator per worker that
    /// took part. Returns after the queue is drained.
    pub fn run<T, S, I, F>(&self, items: Vec<T>, init: I, job: F) -> Vec<S>
    where
        T: Send,
        S: Send,
        I: Fn() -> S + Sync,
        F: Fn(&mut S, T) + Sync,
    {
        if self.workers == 0 || items.len() <= 1 {
            let mut state = init();
            for item in items {
                job(&mut state, item);
            }
            return vec![state];
        }

        let threads = self.workers.min(items.len());
        let queue = Mutex::new(items.into_iter());
        let drain = |state: &mut S| loop {
            let next = lock(&queue).next();
            match next {
                Some(item) => job(state, item),
                None => break,
            }
        };

        thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .filter_map(|i| {
                    thread::Builder::new()
                        .name(format!("tick-worker-{i}"))
                        .spawn_scoped(scope, || {
                            let mut state = init();
                            drain(&mut state);
                            state
                        })
                        .map_err(|e| warn!("Failed to spawn worker {}: {}", i, e))
                        .ok()
                })
                .collect();

            let mut out = Vec::with_capacity(handles.len().max(1));
            if handles.is_empty() {
                let mut state = init();
                drain(&mut state);
                out.push(state);
            }
            for handle in handles {
                match handle.join() {
                    Ok(state) => out.push(state),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            out
        })
    }

    /// Run `job` over every item with no per-worker state.
    pub fn for_each<T, F>(&self, items: Vec<T>, job: F)
    where
        T: Send,
        F: Fn(T) + Sync,
    {
        self.run(items, || (), |_, item| job(item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_run_folds_every_item() {
        let pool = WorkerPool::new(4);
        let parts = pool.run((1..=100u64).collect(), || 0u64, |sum, v| *sum += v);
        assert!(!parts.is_empty() && parts.len() <= 4);
        assert_eq!(parts.iter().sum::<u64>(), 5050);
    }

    #[test]
    fn test_inline_when_no_workers() {
        let pool = WorkerPool::new(0);
        let main = thread::current().id();
        let parts = pool.run(vec![1, 2, 3], Vec::new, |seen: &mut Vec<thread::ThreadId>, _: i32| seen.push(thread::current().id()));
        assert_eq!(parts.len(), 1);
        assert!(parts[0].iter().all(|id| *id == main));
    }

    #[test]
    fn test_for_each_visits_all() {
        let hits = AtomicUsize::new(0);
        WorkerPool::new(3).for_each((0..50).collect(), |_: i32| {
            hits.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 50);
    }
}
