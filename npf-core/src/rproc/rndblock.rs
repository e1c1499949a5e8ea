//! The `rndblock` rule procedure (§4.9): blocks a configurable fraction of
//! otherwise-passing packets, used in tests and demos to exercise the
//! "rule procedure downgrades PASS to BLOCK" path without needing real
//! congestion.

use crate::decision::Decision;
use crate::rproc::{ProcessCtx, RuleProc};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct RndBlockProc {
    /// Block one packet out of every `every`.
    every: u64,
    counter: AtomicU64,
}

impl RndBlockProc {
    pub fn new(every: u64) -> Self {
        RndBlockProc { every: every.max(1), counter: AtomicU64::new(0) }
    }
}

impl RuleProc for RndBlockProc {
    fn name(&self) -> &'static str {
        "rndblock"
    }

    fn process(&self, _ctx: &ProcessCtx, decision: Decision) -> Decision {
        if !decision.is_pass() {
            return decision;
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        if n % self.every == 0 {
            Decision::Block
        } else {
            Decision::Pass
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npc::Npc;

    #[test]
    fn blocks_exactly_one_in_n() {
        let rb = RndBlockProc::new(3);
        let npc = Npc::default();
        let ctx = ProcessCtx { npc: &npc, pktlen: 64, now_ms: 0 };
        let results: Vec<Decision> =
            (0..6).map(|_| rb.process(&ctx, Decision::Pass)).collect();
        let blocked = results.iter().filter(|d| !d.is_pass()).count();
        assert_eq!(blocked, 2);
    }

    #[test]
    fn never_upgrades_an_already_blocked_decision() {
        let rb = RndBlockProc::new(1);
        let npc = Npc::default();
        let ctx = ProcessCtx { npc: &npc, pktlen: 64, now_ms: 0 };
        assert_eq!(rb.process(&ctx, Decision::Block), Decision::Block);
    }
}
