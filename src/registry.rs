//! Registry of available workers, ordered by priority class.
//!
//! Workers with the same priority class are handed out in registration
//! order. A worker keeps its registration rank across take/release cycles,
//! so a released operator does not lose its place to one registered later.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::model::Worker;

/// Heap entry: a worker plus its registration rank.
#[derive(Debug, Clone, Copy)]
struct Ranked {
    worker: Worker,
    rank: u64,
}

impl Ranked {
    fn key(&self) -> (u8, u64) {
        (self.worker.priority_class(), self.rank)
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    // BinaryHeap is a max-heap: the smallest (class, rank) must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// A worker taken from the registry. Hand it back with [`WorkerRegistry::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub worker: Worker,
    rank: u64,
}

/// Available workers, highest precedence first.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    available: BinaryHeap<Ranked>,
    next_rank: u64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker as available. Returns its registration rank.
    pub fn add(&mut self, worker: Worker) -> u64 {
        let rank = self.next_rank;
        self.next_rank += 1;
        self.available.push(Ranked { worker, rank });
        rank
    }

    /// Remove and return the available worker with the lowest priority class.
    pub fn take_next(&mut self) -> Option<Lease> {
        self.available.pop().map(|r| Lease {
            worker: r.worker,
            rank: r.rank,
        })
    }

    /// Return a worker to the available set.
    pub fn release(&mut self, lease: Lease) {
        self.available.push(Ranked {
            worker: lease.worker,
            rank: lease.rank,
        });
    }

    /// The worker `take_next` would return.
    pub fn peek(&self) -> Option<&Worker> {
        self.available.peek().map(|r| &r.worker)
    }

    /// Currently available workers, in dispatch order.
    pub fn available(&self) -> Vec<Worker> {
        let mut ranked: Vec<Ranked> = self.available.iter().copied().collect();
        ranked.sort_by_key(Ranked::key);
        ranked.into_iter().map(|r| r.worker).collect()
    }

    /// Number of workers ever registered.
    pub fn registered(&self) -> usize {
        self.next_rank as usize
    }

    /// Number of available workers.
    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }
}
