//! The connection-DB garbage collector (§4.6, §4.11): single-threaded,
//! step-bounded scan per tick, stable list produced by transfer-from-recent,
//! deferred-destroy queue drained once EBR and refcount allow it.
//!
//! This resolves the spec's Open Question (§9) in favor of the later,
//! well-specified design over the original's unfinished early iterator
//! variants.

use crate::alg::AlgRegistry;
use crate::conndb::{Connection, ConnDb};
use std::sync::Arc;
use std::time::Duration;

/// §4.8 step 7: runs the ALG destroy hook for a connection about to be
/// unlinked, dispatched through the registry by the binding's ALG name
/// rather than matching on `AlgState`'s variant directly. A TCP
/// control-channel connection expires every PPTP slot it still holds; a
/// child GRE connection releases just the one slot (and portmap id) it was
/// keyed on. Both are idempotent against whichever of the pair was already
/// destroyed first.
fn run_alg_destroy_hook(conn: &Connection, algs: &AlgRegistry) {
    let nat_guard = conn.nat.lock();
    let Some(binding) = nat_guard.as_ref() else { return };
    if let Some(name) = binding.alg.alg_name() {
        algs.destroy(name, &binding.alg, &binding.policy.portmap);
    }
}

pub const DEFAULT_STEP_BOUND: usize = 512;

#[derive(Clone, Copy, Default, Debug)]
pub struct GcStats {
    pub expired: usize,
    pub destroyed: usize,
}

/// Runs one G/C tick against `db`. `flush` unconditionally unlinks every
/// entry in the scanned window (used when draining at shutdown); `sync`
/// asks the tick to wait briefly for holdout reclamations before
/// returning, which only the G/C worker thread is allowed to do.
pub fn run_gc_tick(db: &ConnDb, algs: &AlgRegistry, step_bound: usize, flush: bool, sync: bool) -> GcStats {
    db.transfer_recent_to_stable();
    db.ebr.advance();

    let snapshot = db.stable_snapshot(step_bound);
    let mut unlinked_ptrs = Vec::new();
    let mut expired = 0;
    for conn in &snapshot {
        if flush || conn.is_expired() {
            conn.expire_now();
            run_alg_destroy_hook(conn, algs);
            db.remove(&conn.forw_key);
            unlinked_ptrs.push(Arc::as_ptr(conn));
            expired += 1;
        }
    }
    db.drop_expired_from_stable(&unlinked_ptrs);

    let mut destroyed = 0;
    let mut holdouts = Vec::new();
    for (conn, epoch) in db.take_deferred() {
        if conn.refcnt() == 0 && db.ebr.safe_to_reclaim(epoch) {
            destroyed += 1;
            drop(conn);
        } else {
            holdouts.push((conn, epoch));
        }
    }

    if sync && !holdouts.is_empty() {
        std::thread::sleep(Duration::from_millis(10));
        db.ebr.advance();
        let mut still = Vec::new();
        for (conn, epoch) in holdouts {
            if conn.refcnt() == 0 && db.ebr.safe_to_reclaim(epoch) {
                destroyed += 1;
                drop(conn);
            } else {
                still.push((conn, epoch));
            }
        }
        holdouts = still;
    }
    db.push_back_deferred(holdouts);

    GcStats { expired, destroyed }
}
