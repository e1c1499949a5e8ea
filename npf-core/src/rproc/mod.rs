//! Rule procedures (§3 "Extension", §4.9): pluggable per-rule processing
//! hooks that run after a rule match and may downgrade a PASS decision to
//! BLOCK (log, rate-limit, rndblock).

pub mod log;
pub mod ratelimit;
pub mod rndblock;

pub use log::LogProc;
pub use ratelimit::{CarConfig, RateLimitProc};
pub use rndblock::RndBlockProc;

use crate::decision::Decision;
use crate::npc::Npc;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-packet context a rule procedure's `process` hook sees.
pub struct ProcessCtx<'a> {
    pub npc: &'a Npc,
    pub pktlen: usize,
    pub now_ms: u64,
}

/// The function table behind an "Extension" (§3): `construct`/`destruct`
/// are modeled by ordinary Rust construction/`Drop`; only `process`
/// remains as an explicit hook (§9 "callback tables -> trait-like
/// capabilities").
pub trait RuleProc: Send + Sync {
    fn name(&self) -> &'static str;

    /// May only ever tighten a decision (PASS -> BLOCK), never loosen one,
    /// matching §4.10 step 4 ("may downgrade PASS to BLOCK").
    fn process(&self, ctx: &ProcessCtx, decision: Decision) -> Decision;
}

/// Global rule-procedure registry (§3: "reference-counted; cannot be
/// removed while any rule references it").
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: HashMap<String, Arc<dyn RuleProc>>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExtensionError {
    #[error("extension '{0}' already registered")]
    Exist(String),
    #[error("extension '{0}' not found")]
    NotFound(String),
    #[error("extension '{0}' still referenced by a rule")]
    StillReferenced(String),
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        ExtensionRegistry::default()
    }

    pub fn register(&mut self, proc: Arc<dyn RuleProc>) -> Result<(), ExtensionError> {
        let name = proc.name().to_string();
        if self.extensions.contains_key(&name) {
            return Err(ExtensionError::Exist(name));
        }
        self.extensions.insert(name, proc);
        Ok(())
    }

    /// Hands out a new reference a rule can attach; this is the "ownership"
    /// increment the spec describes.
    pub fn attach(&self, name: &str) -> Option<Arc<dyn RuleProc>> {
        self.extensions.get(name).cloned()
    }

    /// Fails while any rule still holds a reference (strong count > 1: the
    /// registry's own entry plus at least one rule).
    pub fn unregister(&mut self, name: &str) -> Result<(), ExtensionError> {
        match self.extensions.get(name) {
            None => Err(ExtensionError::NotFound(name.to_string())),
            Some(arc) if Arc::strong_count(arc) > 1 => {
                Err(ExtensionError::StillReferenced(name.to_string()))
            }
            Some(_) => {
                self.extensions.remove(name);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl RuleProc for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }
        fn process(&self, _ctx: &ProcessCtx, decision: Decision) -> Decision {
            decision
        }
    }

    #[test]
    fn cannot_unregister_while_a_rule_still_holds_a_reference() {
        let mut reg = ExtensionRegistry::new();
        reg.register(Arc::new(Noop)).unwrap();
        let held_by_rule = reg.attach("noop").unwrap();
        assert_eq!(
            reg.unregister("noop"),
            Err(ExtensionError::StillReferenced("noop".into()))
        );
        drop(held_by_rule);
        assert!(reg.unregister("noop").is_ok());
    }
}
