//! NAT binding: the per-connection translation record (§3, §4.7).

use crate::addr::Addr;
use crate::alg::pptp::PptpTcpContext;
use crate::conndb::key::ConnectionKey;
use crate::nat::policy::NatPolicy;
use std::sync::Arc;

/// Opaque ALG-owned state a binding may carry, replacing the original's
/// `void *` ALG private-data slot with a closed enum (§9: avoid `dyn Any`).
pub enum AlgState {
    None,
    /// Attached to the TCP control-channel binding.
    PptpTcp(Arc<PptpTcpContext>),
    /// Attached to a child GRE connection's binding: identifies which slot
    /// of the parent TCP context it corresponds to, without holding a
    /// pointer back to the parent (§9 "avoid a cycle").
    PptpGre {
        ctx: Arc<PptpTcpContext>,
        slot: usize,
        parent: ConnectionKey,
    },
}

impl AlgState {
    /// The `AlgRegistry` name this state's ALG is registered under, used
    /// to dispatch `translate`/`destroy` hooks by name rather than by
    /// matching on the variant directly.
    pub fn alg_name(&self) -> Option<&'static str> {
        match self {
            AlgState::None => None,
            AlgState::PptpTcp(_) | AlgState::PptpGre { .. } => Some(crate::alg::pptp::ALG_NAME),
        }
    }
}

pub struct NatBinding {
    pub orig_addr: Addr,
    pub orig_id: u16,
    pub trans_addr: Addr,
    pub trans_id: u16,
    pub policy: Arc<NatPolicy>,
    pub alg: AlgState,
}

impl NatBinding {
    pub fn new(
        orig_addr: Addr,
        orig_id: u16,
        trans_addr: Addr,
        trans_id: u16,
        policy: Arc<NatPolicy>,
    ) -> Self {
        NatBinding {
            orig_addr,
            orig_id,
            trans_addr,
            trans_id,
            policy,
            alg: AlgState::None,
        }
    }
}
