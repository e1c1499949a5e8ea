//! Connection keys: fixed-size, byte-comparable flow identifiers (§3, §6).

use crate::addr::Addr;

/// Identifies one direction of a flow: protocol, address family, the two
/// endpoints, and their L4 identifiers (port, ICMP query id, or GRE call id).
///
/// Keys compare byte-wise and are symmetric by construction: a connection's
/// forward and backward keys are the same tuple with src/dst swapped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ConnectionKey {
    pub proto: u8,
    pub alen: u8,
    pub src_addr: Addr,
    pub dst_addr: Addr,
    pub src_id: u16,
    pub dst_id: u16,
}

impl ConnectionKey {
    pub fn new(
        proto: u8,
        alen: u8,
        src_addr: Addr,
        dst_addr: Addr,
        src_id: u16,
        dst_id: u16,
    ) -> Self {
        ConnectionKey {
            proto,
            alen,
            src_addr,
            dst_addr,
            src_id,
            dst_id,
        }
    }

    /// The key seen from the other side of the flow.
    pub fn reversed(&self) -> ConnectionKey {
        ConnectionKey {
            proto: self.proto,
            alen: self.alen,
            src_addr: self.dst_addr,
            dst_addr: self.src_addr,
            src_id: self.dst_id,
            dst_id: self.src_id,
        }
    }

    /// Builds the forward/backward key pair for a freshly observed packet,
    /// where `src`/`dst` are the packet's own addresses (direction as seen
    /// on the wire, before any NAT rewrite).
    pub fn pair(
        proto: u8,
        alen: u8,
        src_addr: Addr,
        dst_addr: Addr,
        src_id: u16,
        dst_id: u16,
    ) -> (ConnectionKey, ConnectionKey) {
        let forw = ConnectionKey::new(proto, alen, src_addr, dst_addr, src_id, dst_id);
        let back = forw.reversed();
        (forw, back)
    }

    /// A custom key for flows the 5-tuple cannot express (PPTP enhanced GRE,
    /// §4.8 step 5): `{proto: GRE, src_id: call_id, dst_id: 0}`.
    pub fn gre_call_id(alen: u8, src_addr: Addr, dst_addr: Addr, call_id: u16) -> ConnectionKey {
        ConnectionKey::new(
            crate::proto::IPPROTO_GRE,
            alen,
            src_addr,
            dst_addr,
            call_id,
            0,
        )
    }
}
