//! Packet queue statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of queue activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Units accepted by enqueue
    pub enqueued: u64,

    /// Units handed to the writer by dequeue
    pub dequeued: u64,

    /// Units removed by trim or drain
    pub evicted: u64,

    /// Evicted units whose payload the queue released
    pub released: u64,

    /// Evicted units handed back to their external owner
    pub reclaimed: u64,

    /// Trims that removed at least one unit
    pub trims: u64,

    /// Units currently resident
    pub size: usize,

    /// Video units currently resident
    pub video_units: usize,
}

impl QueueStats {
    /// Fraction of enqueued units that were evicted rather than dequeued
    pub fn eviction_rate(&self) -> f64 {
        if self.enqueued == 0 {
            return 0.0;
        }

        self.evicted as f64 / self.enqueued as f64
    }
}

/// Lock-free counters behind [`QueueStats`]
#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pub enqueued: AtomicU64,
    pub dequeued: AtomicU64,
    pub evicted: AtomicU64,
    pub released: AtomicU64,
    pub reclaimed: AtomicU64,
    pub trims: AtomicU64,
}

impl QueueCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, size: usize, video_units: usize) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            trims: self.trims.load(Ordering::Relaxed),
            size,
            video_units,
        }
    }
}
