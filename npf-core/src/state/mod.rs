//! Per-protocol connection state machines (§4.5).

pub mod generic;
pub mod tcp;

pub use generic::GenericState;
pub use tcp::{Segment, TcpState, TcpTracker};

use crate::npc::Npc;
use crate::proto;
use std::time::Duration;

/// The state block a [`crate::conndb::connection::Connection`] owns,
/// dispatched on protocol the way `npf_state_t` is a tagged union over the
/// handful of trackers the original supports.
#[derive(Clone, Debug)]
pub enum ProtoState {
    Tcp(TcpTracker),
    Generic { state: GenericState, is_gre: bool },
}

impl ProtoState {
    pub fn new_for_proto(proto: u8) -> ProtoState {
        match proto {
            proto::IPPROTO_TCP => ProtoState::Tcp(TcpTracker::default()),
            proto::IPPROTO_GRE => ProtoState::Generic {
                state: GenericState::Closed,
                is_gre: true,
            },
            _ => ProtoState::Generic {
                state: GenericState::Closed,
                is_gre: false,
            },
        }
    }

    /// Advances the tracker for one observed packet, in the given direction
    /// (`true` = along the connection's forward key). Returns whether the
    /// packet should be accepted by state inspection (§4.5 `state_inspect`).
    pub fn inspect(&mut self, npc: &Npc, forward: bool) -> bool {
        match self {
            ProtoState::Tcp(tracker) => {
                let seg = Segment {
                    flags: npc.tcp_flags,
                    seq: npc.tcp_seq,
                    ack: npc.tcp_ack,
                    win: npc.tcp_win,
                    data_len: 0,
                };
                tracker.inspect(&seg, forward)
            }
            ProtoState::Generic { state, .. } => {
                let (next, ok) = state.advance(forward);
                *state = next;
                ok
            }
        }
    }

    pub fn is_established(&self) -> bool {
        match self {
            ProtoState::Tcp(t) => t.state == TcpState::Established,
            ProtoState::Generic { state, .. } => *state == GenericState::Established,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            ProtoState::Tcp(t) => t.state.timeout(),
            ProtoState::Generic { state, is_gre } => state.timeout(*is_gre),
        }
    }
}
