//! ALG framework (§4.8): match/translate/inspect/destroy hooks chained into
//! NAT, each ALG registered as an `AlgOps` capability bundle of plain
//! function pointers (§9 "callback tables -> trait-like capabilities")
//! rather than a hardcoded dispatch on a boolean flag. PPTP is the one ALG
//! this crate implements; a second one is added by constructing another
//! `AlgOps` and calling `AlgRegistry::register` — nothing in `nat` or
//! `pipeline` names "pptp" directly.

pub mod pptp;

use crate::conndb::key::ConnectionKey;
use crate::nat::binding::{AlgState, NatBinding};
use crate::nat::portmap::Portmap;
use crate::npc::Npc;
use std::collections::HashMap;

/// What a translate hook reports back to the pipeline when it just
/// completed an ALG-specific side effect the pipeline must act on (§4.8
/// step 3: standing up a child connection). `None` is the common case: the
/// hook rewrote bytes in place and there is nothing further to do.
pub enum AlgEvent {
    None,
    PptpTunnelEstablished(pptp::PptpEstablished),
}

/// §4.8 step 1 (match): identifies a flow on its first packet and returns
/// the fresh per-flow ALG state to attach to its NAT binding, or `None` if
/// this ALG does not claim the flow.
pub type AlgMatchFn = fn(&Npc) -> Option<AlgState>;
/// §4.8 step 2-4 (translate): rewrites payload bytes in place.
pub type AlgTranslateFn = fn(&NatBinding, &Npc, &mut [u8]) -> AlgEvent;
/// §4.8 step 5 (inspect): the custom connection-DB key for a packet whose
/// standard 5-tuple does not address it (PPTP enhanced-GRE data).
pub type AlgInspectFn = fn(&Npc, &[u8]) -> Option<ConnectionKey>;
/// §4.8 step 7 (destroy): tears down ALG-owned state (slots, portmap ids).
pub type AlgDestroyFn = fn(&AlgState, &Portmap);

/// The capability bundle `SPEC_FULL.md` §4.8 names in place of the
/// original's `npfa_funcs` callback vector.
pub struct AlgOps {
    pub match_fn: AlgMatchFn,
    pub translate_fn: AlgTranslateFn,
    pub inspect_fn: AlgInspectFn,
    pub destroy_fn: AlgDestroyFn,
}

/// Global ALG registry (§3 "ALG record ... registered globally in the
/// system instance's ALG registry"). Held as a field on `System`.
pub struct AlgRegistry {
    algs: HashMap<&'static str, AlgOps>,
}

impl Default for AlgRegistry {
    /// Every built-in ALG registered, same as `new()`. Test code and the
    /// e2e harness construct registries with `AlgRegistry::default()`; it
    /// must behave like production's default-enabled PPTP rather than an
    /// empty map that silently no-ops every dispatch.
    fn default() -> Self {
        Self::new()
    }
}

impl AlgRegistry {
    /// Every built-in ALG registered (today: PPTP). Mirrors the teacher's
    /// "construct with everything wired up" convention.
    pub fn new() -> Self {
        AlgRegistry::with_pptp(true)
    }

    /// No ALGs registered.
    pub fn empty() -> Self {
        AlgRegistry { algs: HashMap::new() }
    }

    /// Built with PPTP registered or not, per `Config::pptp_enabled`.
    pub fn with_pptp(enabled: bool) -> Self {
        let mut registry = AlgRegistry::empty();
        if enabled {
            registry.register(pptp::ALG_NAME, pptp::ops());
        }
        registry
    }

    pub fn register(&mut self, name: &'static str, ops: AlgOps) {
        self.algs.insert(name, ops);
    }

    /// Step 1: the first ALG whose `match_fn` claims this packet, along
    /// with the fresh ALG state the pipeline should attach to the new
    /// binding.
    pub fn match_alg(&self, npc: &Npc) -> Option<AlgState> {
        self.algs.values().find_map(|ops| (ops.match_fn)(npc))
    }

    /// Step 5: the custom connection-DB lookup key, if any registered ALG
    /// claims this packet.
    pub fn inspect_key(&self, npc: &Npc, buf: &[u8]) -> Option<ConnectionKey> {
        self.algs.values().find_map(|ops| (ops.inspect_fn)(npc, buf))
    }

    /// Steps 2-4: dispatches to the named ALG's translate hook. A name with
    /// no registered `AlgOps` (e.g. the ALG was disabled after the
    /// connection was created) is a no-op rather than an error.
    pub fn translate(&self, name: &str, binding: &NatBinding, npc: &Npc, buf: &mut [u8]) -> AlgEvent {
        match self.algs.get(name) {
            Some(ops) => (ops.translate_fn)(binding, npc, buf),
            None => AlgEvent::None,
        }
    }

    /// Step 7: dispatches to the named ALG's destroy hook.
    pub fn destroy(&self, name: &str, alg: &AlgState, portmap: &Portmap) {
        if let Some(ops) = self.algs.get(name) {
            (ops.destroy_fn)(alg, portmap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Addr;
    use crate::proto;

    #[test]
    fn matches_pptp_on_control_port() {
        let reg = AlgRegistry::new();
        let npc = Npc {
            proto: proto::IPPROTO_TCP,
            dst_id: proto::PPTP_CTRL_PORT,
            src_addr: Addr::ZERO,
            dst_addr: Addr::ZERO,
            ..Default::default()
        };
        assert!(matches!(reg.match_alg(&npc), Some(AlgState::PptpTcp(_))));
    }

    #[test]
    fn does_not_match_unrelated_tcp() {
        let reg = AlgRegistry::new();
        let npc = Npc {
            proto: proto::IPPROTO_TCP,
            dst_id: 443,
            ..Default::default()
        };
        assert!(reg.match_alg(&npc).is_none());
    }

    #[test]
    fn empty_registry_matches_nothing() {
        let reg = AlgRegistry::empty();
        let npc = Npc {
            proto: proto::IPPROTO_TCP,
            dst_id: proto::PPTP_CTRL_PORT,
            ..Default::default()
        };
        assert!(reg.match_alg(&npc).is_none());
    }
}
