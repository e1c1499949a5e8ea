//! Epoch-based reclamation (§4.6, §5): a generation counter plus a
//! per-worker checkpoint array. A deferred free is safe once every
//! registered worker has checkpointed past the epoch the unlink happened
//! in.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct WorkerHandle(usize);

pub struct Ebr {
    epoch: AtomicU64,
    /// `None` marks a free slot a future `register` can reuse.
    checkpoints: Mutex<Vec<Option<AtomicU64>>>,
}

impl Default for Ebr {
    fn default() -> Self {
        Ebr::new()
    }
}

impl Ebr {
    pub fn new() -> Self {
        Ebr {
            epoch: AtomicU64::new(1),
            checkpoints: Mutex::new(Vec::new()),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Bumps the global epoch; called by the G/C worker once per tick
    /// before scanning for reclaimable nodes.
    pub fn advance(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn register(&self) -> WorkerHandle {
        let mut slots = self.checkpoints.lock();
        let cur = self.current_epoch();
        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(AtomicU64::new(cur));
                return WorkerHandle(i);
            }
        }
        slots.push(Some(AtomicU64::new(cur)));
        WorkerHandle(slots.len() - 1)
    }

    /// Records that this worker has entered the current epoch (§5 "each
    /// dataplane worker must ... checkpoint between packets").
    pub fn checkpoint(&self, handle: &WorkerHandle) {
        let cur = self.current_epoch();
        let slots = self.checkpoints.lock();
        if let Some(Some(slot)) = slots.get(handle.0) {
            slot.store(cur, Ordering::Release);
        }
    }

    pub fn unregister(&self, handle: WorkerHandle) {
        let mut slots = self.checkpoints.lock();
        if let Some(slot) = slots.get_mut(handle.0) {
            *slot = None;
        }
    }

    /// The oldest epoch any still-registered worker might be inside.
    /// `None` (no registered workers) means reclamation is always safe.
    fn min_checkpoint(&self) -> Option<u64> {
        self.checkpoints
            .lock()
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|a| a.load(Ordering::Acquire))
            .min()
    }

    /// Whether a node unlinked at `unlink_epoch` is safe to free: every
    /// registered worker must have checkpointed at an epoch strictly past
    /// it, so no in-flight reader that observed the node before unlink can
    /// still be executing.
    pub fn safe_to_reclaim(&self, unlink_epoch: u64) -> bool {
        match self.min_checkpoint() {
            Some(min) => min > unlink_epoch,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reclamation_waits_for_lagging_worker_checkpoint() {
        let ebr = Ebr::new();
        let w1 = ebr.register();
        let unlink_epoch = ebr.current_epoch();
        ebr.advance();

        // w1 has not checkpointed past unlink_epoch yet.
        assert!(!ebr.safe_to_reclaim(unlink_epoch));

        ebr.checkpoint(&w1);
        assert!(ebr.safe_to_reclaim(unlink_epoch));
    }

    #[test]
    fn no_registered_workers_is_always_safe() {
        let ebr = Ebr::new();
        assert!(ebr.safe_to_reclaim(ebr.current_epoch()));
    }

    #[test]
    fn unregistering_a_worker_stops_it_blocking_reclamation() {
        let ebr = Ebr::new();
        let w1 = ebr.register();
        let unlink_epoch = ebr.current_epoch();
        ebr.advance();
        assert!(!ebr.safe_to_reclaim(unlink_epoch));
        ebr.unregister(w1);
        assert!(ebr.safe_to_reclaim(unlink_epoch));
    }
}
