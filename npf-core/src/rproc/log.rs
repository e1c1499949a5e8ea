//! The `log` rule procedure (§4.9 "rproc::log ... round out the rule
//! procedure framework"): records a `tracing` event per packet a rule
//! matched, never alters the decision.

use crate::decision::Decision;
use crate::rproc::{ProcessCtx, RuleProc};

pub struct LogProc {
    pub label: String,
}

impl LogProc {
    pub fn new(label: impl Into<String>) -> Self {
        LogProc { label: label.into() }
    }
}

impl RuleProc for LogProc {
    fn name(&self) -> &'static str {
        "log"
    }

    fn process(&self, ctx: &ProcessCtx, decision: Decision) -> Decision {
        tracing::debug!(
            label = %self.label,
            proto = ctx.npc.proto,
            pktlen = ctx.pktlen,
            decision = ?decision,
            "rule matched",
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npc::Npc;

    #[test]
    fn never_changes_the_decision() {
        let log = LogProc::new("test-rule");
        let npc = Npc::default();
        let ctx = ProcessCtx { npc: &npc, pktlen: 64, now_ms: 0 };
        assert_eq!(log.process(&ctx, Decision::Pass), Decision::Pass);
        assert_eq!(log.process(&ctx, Decision::Block), Decision::Block);
    }
}
