//! Per-worker, lock-free counters (§6 "Statistics"), summed across workers
//! on read. Each dataplane worker owns its own `Stats` so hot-path updates
//! never contend on a shared cache line; a management-plane reader sums
//! the per-worker snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    pub packets_passed: AtomicU64,
    pub packets_blocked: AtomicU64,
    pub connections_created: AtomicU64,
    pub connections_destroyed: AtomicU64,
    pub nat_alloc_failures: AtomicU64,
    pub portmap_exhausted: AtomicU64,
    pub state_rejects: AtomicU64,
}

/// A point-in-time, plain-data copy suitable for exporting to metrics or
/// a management-plane query response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_passed: u64,
    pub packets_blocked: u64,
    pub connections_created: u64,
    pub connections_destroyed: u64,
    pub nat_alloc_failures: u64,
    pub portmap_exhausted: u64,
    pub state_rejects: u64,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn record_pass(&self) {
        self.packets_passed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block(&self) {
        self.packets_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_destroyed(&self) {
        self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nat_alloc_failure(&self) {
        self.nat_alloc_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_portmap_exhausted(&self) {
        self.portmap_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_reject(&self) {
        self.state_rejects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_passed: self.packets_passed.load(Ordering::Relaxed),
            packets_blocked: self.packets_blocked.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_destroyed: self.connections_destroyed.load(Ordering::Relaxed),
            nat_alloc_failures: self.nat_alloc_failures.load(Ordering::Relaxed),
            portmap_exhausted: self.portmap_exhausted.load(Ordering::Relaxed),
            state_rejects: self.state_rejects.load(Ordering::Relaxed),
        }
    }
}

/// Sums a set of per-worker `Stats` into one snapshot for reporting.
pub fn aggregate<'a>(workers: impl IntoIterator<Item = &'a Stats>) -> StatsSnapshot {
    let mut total = StatsSnapshot::default();
    for w in workers {
        let s = w.snapshot();
        total.packets_passed += s.packets_passed;
        total.packets_blocked += s.packets_blocked;
        total.connections_created += s.connections_created;
        total.connections_destroyed += s.connections_destroyed;
        total.nat_alloc_failures += s.nat_alloc_failures;
        total.portmap_exhausted += s.portmap_exhausted;
        total.state_rejects += s.state_rejects;
    }
    total
}
