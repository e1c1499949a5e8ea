//! PPTP ALG (§4.8): TCP control-channel fixups plus enhanced-GRE tunnel
//! tracking. The hardest sub-component per the spec, mirroring
//! `examples/original_source/src/kern/npf_alg_pptp.c`.

use crate::addr::Addr;
use crate::alg::{AlgEvent, AlgOps};
use crate::conndb::key::ConnectionKey;
use crate::nat::binding::{AlgState, NatBinding};
use crate::nat::portmap::Portmap;
use crate::npc::{CacheInfo, Npc};
use crate::proto;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// The name this ALG registers itself under in `AlgRegistry`.
pub const ALG_NAME: &str = "pptp";

/// The `AlgOps` capability bundle wiring this module's hooks into
/// `AlgRegistry` (§4.8, §9 "callback tables -> trait-like capabilities").
pub fn ops() -> AlgOps {
    AlgOps {
        match_fn: match_flow,
        translate_fn: translate,
        inspect_fn: inspect,
        destroy_fn: destroy,
    }
}

/// §4.8 step 1: claims outbound TCP to the PPTP control port and returns
/// the freshly constructed per-flow context to attach to the binding.
fn match_flow(npc: &Npc) -> Option<AlgState> {
    if npc.proto != proto::IPPROTO_TCP
        || (npc.dst_id != proto::PPTP_CTRL_PORT && npc.src_id != proto::PPTP_CTRL_PORT)
    {
        return None;
    }
    let server_addr = if npc.dst_id == proto::PPTP_CTRL_PORT { npc.dst_addr } else { npc.src_addr };
    Some(AlgState::PptpTcp(Arc::new(PptpTcpContext::new(server_addr, npc.alen))))
}

/// §4.8 steps 2-4, dispatched through `AlgRegistry::translate`.
fn translate(binding: &NatBinding, npc: &Npc, buf: &mut [u8]) -> AlgEvent {
    match apply_tcp_fixup(binding, npc, buf) {
        Some(est) => AlgEvent::PptpTunnelEstablished(est),
        None => AlgEvent::None,
    }
}

/// §4.8 step 5: recognizes enhanced-GRE data packets, which carry no port
/// for the standard 5-tuple key to use, by their GRE call id instead.
fn inspect(npc: &Npc, buf: &[u8]) -> Option<ConnectionKey> {
    if !npc.info.contains(CacheInfo::GRE_ENHANCED) {
        return None;
    }
    let call_id = read_gre_call_id(&buf[npc.l4_off..])?;
    Some(ConnectionKey::gre_call_id(npc.alen, npc.src_addr, npc.dst_addr, call_id))
}

/// §4.8 step 7, dispatched through `AlgRegistry::destroy`: a TCP control
/// connection expires every slot it still holds; a child GRE connection
/// releases just the one slot it was keyed on.
fn destroy(alg: &AlgState, portmap: &Portmap) {
    match alg {
        AlgState::PptpTcp(ctx) => {
            ctx.destroy_all(portmap);
        }
        AlgState::PptpGre { ctx, slot, .. } => {
            ctx.release_slot(portmap, *slot);
        }
        AlgState::None => {}
    }
}

pub const PPTP_MAGIC_COOKIE: u32 = 0x1A2B3C4D;
pub const PPTP_HDR_LEN: usize = 12;
pub const PPTP_MIN_OCR_LEN: usize = 32;

pub const CTRL_OUTGOING_CALL_REQUEST: u16 = 7;
pub const CTRL_OUTGOING_CALL_REPLY: u16 = 8;
pub const CTRL_CALL_CLEAR_REQUEST: u16 = 12;
pub const CTRL_CALL_DISCONNECT_NOTIFY: u16 = 13;
pub const CTRL_WAN_ERROR_NOTIFY: u16 = 14;

/// One of four per-TCP-context slots tracking a single client<->server GRE
/// tunnel. Flags are the states, per §4.8.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SlotState {
    Free,
    Used,
    UsedServerId,
    Established,
}

#[derive(Clone, Copy, Debug)]
pub struct PptpSlot {
    pub state: SlotState,
    pub client_call_id: u16,
    pub trans_call_id: u16,
    pub server_call_id: u16,
}

impl Default for PptpSlot {
    fn default() -> Self {
        PptpSlot {
            state: SlotState::Free,
            client_call_id: 0,
            trans_call_id: 0,
            server_call_id: 0,
        }
    }
}

/// PPTP state attached to a TCP control-channel NAT binding. The GRE child
/// connection does not hold a pointer back to this context (§9 "avoid a
/// cycle"); it carries the slot identity and looks the context up through
/// the parent connection's key when it needs to.
pub struct PptpTcpContext {
    pub server_addr: Addr,
    pub alen: u8,
    slots: Mutex<[PptpSlot; 4]>,
}

impl PptpTcpContext {
    pub fn new(server_addr: Addr, alen: u8) -> Self {
        PptpTcpContext {
            server_addr,
            alen,
            slots: Mutex::new([PptpSlot::default(); 4]),
        }
    }

    /// Step 2: OUTGOING-CALL-REQUEST. Allocates a translated call id from
    /// the portmap keyed on the server's address and records the mapping
    /// in a free slot. Returns the translated id to write into the packet.
    pub fn translate_call_request(
        &self,
        portmap: &Portmap,
        client_call_id: u16,
    ) -> Option<u16> {
        let mut slots = self.slots.lock();
        let idx = slots.iter().position(|s| s.state == SlotState::Free)?;
        let trans_call_id = portmap.allocate(self.server_addr, self.alen)?;
        slots[idx] = PptpSlot {
            state: SlotState::Used,
            client_call_id,
            trans_call_id,
            server_call_id: 0,
        };
        Some(trans_call_id)
    }

    /// Step 3: OUTGOING-CALL-REPLY. Looks the slot up by the translated
    /// client call id, records the server's assigned call id, and reports
    /// whether a child GRE connection should now be established, along
    /// with the original client call id to restore on the wire.
    pub fn translate_call_reply(
        &self,
        trans_call_id: u16,
        server_call_id: u16,
    ) -> Option<(u16, usize)> {
        let mut slots = self.slots.lock();
        let idx = slots
            .iter()
            .position(|s| s.state == SlotState::Used && s.trans_call_id == trans_call_id)?;
        slots[idx].state = SlotState::UsedServerId;
        slots[idx].server_call_id = server_call_id;
        Some((slots[idx].client_call_id, idx))
    }

    /// Marks a slot established. Returns `true` the one time the slot
    /// actually transitions, so the caller (`apply_tcp_fixup`) knows to
    /// establish the child GRE connection exactly once per call.
    pub fn mark_established(&self, idx: usize) -> bool {
        let mut slots = self.slots.lock();
        if slots[idx].state == SlotState::UsedServerId {
            slots[idx].state = SlotState::Established;
            true
        } else {
            false
        }
    }

    /// Step 4: CALL-DISCONNECT-NOTIFY / WAN-ERROR-NOTIFY. Frees the slot
    /// matching either call id and releases its portmap allocation.
    /// Returns the slot that was freed, if any, so the caller can expire
    /// the corresponding child GRE connection.
    pub fn disconnect(&self, portmap: &Portmap, call_id: u16) -> Option<PptpSlot> {
        let mut slots = self.slots.lock();
        let idx = slots.iter().position(|s| {
            s.state != SlotState::Free
                && (s.trans_call_id == call_id || s.server_call_id == call_id)
        })?;
        let freed = slots[idx];
        portmap.release(self.server_addr, self.alen, freed.trans_call_id);
        slots[idx] = PptpSlot::default();
        Some(freed)
    }

    /// Step 7: destroy. Expires every still-used slot, e.g. when the TCP
    /// control connection itself is torn down.
    pub fn destroy_all(&self, portmap: &Portmap) -> Vec<PptpSlot> {
        let mut slots = self.slots.lock();
        let mut freed = Vec::new();
        for slot in slots.iter_mut() {
            if slot.state != SlotState::Free {
                portmap.release(self.server_addr, self.alen, slot.trans_call_id);
                freed.push(*slot);
                *slot = PptpSlot::default();
            }
        }
        freed
    }

    /// §4.8 step 7 (destroy): frees a single slot unconditionally, e.g. when
    /// the child GRE connection holding it is reaped by the G/C worker.
    /// Idempotent against a slot already freed by [`Self::destroy_all`].
    pub fn release_slot(&self, portmap: &Portmap, idx: usize) -> Option<PptpSlot> {
        let mut slots = self.slots.lock();
        if slots[idx].state == SlotState::Free {
            return None;
        }
        let freed = slots[idx];
        portmap.release(self.server_addr, self.alen, freed.trans_call_id);
        slots[idx] = PptpSlot::default();
        Some(freed)
    }

    pub fn slot(&self, idx: usize) -> PptpSlot {
        self.slots.lock()[idx]
    }

    pub fn find_by_server_call_id(&self, server_call_id: u16) -> Option<usize> {
        self.slots
            .lock()
            .iter()
            .position(|s| s.state != SlotState::Free && s.server_call_id == server_call_id)
    }
}

/// Parses the fixed 12-byte PPTP control-message header at the start of a
/// TCP segment's payload. Returns the control message type, or `None` if
/// the magic cookie or PPTP message type do not match.
pub fn parse_ctrl_header(payload: &[u8]) -> Option<u16> {
    if payload.len() < PPTP_HDR_LEN {
        return None;
    }
    let pptp_msg_type = u16::from_be_bytes([payload[2], payload[3]]);
    let magic = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    if pptp_msg_type != 1 || magic != PPTP_MAGIC_COOKIE {
        return None;
    }
    let ctrl_type = u16::from_be_bytes([payload[8], payload[9]]);
    if ctrl_type == CTRL_OUTGOING_CALL_REQUEST && payload.len() < PPTP_MIN_OCR_LEN {
        return None;
    }
    Some(ctrl_type)
}

pub fn read_call_id(payload: &[u8]) -> Option<u16> {
    if payload.len() < PPTP_HDR_LEN + 2 {
        return None;
    }
    Some(u16::from_be_bytes([
        payload[PPTP_HDR_LEN],
        payload[PPTP_HDR_LEN + 1],
    ]))
}

pub fn read_peer_call_id(payload: &[u8]) -> Option<u16> {
    if payload.len() < PPTP_HDR_LEN + 4 {
        return None;
    }
    Some(u16::from_be_bytes([
        payload[PPTP_HDR_LEN + 2],
        payload[PPTP_HDR_LEN + 3],
    ]))
}

pub fn write_call_id(payload: &mut [u8], call_id: u16) {
    payload[PPTP_HDR_LEN..PPTP_HDR_LEN + 2].copy_from_slice(&call_id.to_be_bytes());
}

pub fn write_peer_call_id(payload: &mut [u8], call_id: u16) {
    payload[PPTP_HDR_LEN + 2..PPTP_HDR_LEN + 4].copy_from_slice(&call_id.to_be_bytes());
}

/// Enhanced GRE header (version bits == 1, §6): minimal fields needed to
/// read/rewrite the call id for data-plane tunnel packets.
pub fn is_enhanced_gre(flags_ver: u16) -> bool {
    flags_ver & 0x7 == 1
}

pub const GRE_CALL_ID_OFFSET: usize = 8;

pub fn read_gre_call_id(payload: &[u8]) -> Option<u16> {
    if payload.len() < GRE_CALL_ID_OFFSET + 2 {
        return None;
    }
    Some(u16::from_be_bytes([
        payload[GRE_CALL_ID_OFFSET],
        payload[GRE_CALL_ID_OFFSET + 1],
    ]))
}

pub fn write_gre_call_id(payload: &mut [u8], call_id: u16) {
    payload[GRE_CALL_ID_OFFSET..GRE_CALL_ID_OFFSET + 2].copy_from_slice(&call_id.to_be_bytes());
}

/// Fixed TCP header length assumed by `Npc::cache` (no options support),
/// matching the offset the PPTP control payload starts at.
const TCP_HDR_LEN: usize = 20;

/// Reported by [`apply_tcp_fixup`] the one time a slot's OUTGOING-CALL-REPLY
/// round trip completes, so the pipeline can register the child GRE
/// connection (§4.8 step 3). Carries everything needed to build the two
/// `ConnectionKey`s the tunnel's two directions actually carry on the wire:
/// client-to-server frames use `server_call_id`, server-to-client frames use
/// `trans_call_id` (restored to `client_call_id` only once they reach the
/// real client, by this same fixup on the next packet).
pub struct PptpEstablished {
    pub ctx: Arc<PptpTcpContext>,
    pub slot: usize,
    pub client_addr: Addr,
    pub server_addr: Addr,
    pub alen: u8,
    pub server_call_id: u16,
    pub trans_call_id: u16,
}

/// §4.8 steps 2-4: the PPTP TCP control-channel fixup run from the
/// pipeline's NAT step when a connection's binding carries
/// `AlgState::PptpTcp`. Rewrites call ids in place; a full TCP checksum
/// recompute over the rewritten payload is left to checksum-offload (only
/// address/port rewrites get the RFC 1624 incremental treatment here).
pub fn apply_tcp_fixup(binding: &NatBinding, npc: &Npc, buf: &mut [u8]) -> Option<PptpEstablished> {
    let AlgState::PptpTcp(ctx) = &binding.alg else {
        return None;
    };
    if npc.proto != proto::IPPROTO_TCP {
        return None;
    }
    let payload_off = npc.l4_off + TCP_HDR_LEN;
    if buf.len() < payload_off {
        return None;
    }
    let payload = &buf[payload_off..];
    let ctrl_type = parse_ctrl_header(payload)?;

    match ctrl_type {
        CTRL_OUTGOING_CALL_REQUEST => {
            let client_call_id = read_call_id(payload)?;
            let Some(trans_id) = ctx.translate_call_request(&binding.policy.portmap, client_call_id)
            else {
                debug!("pptp: call-id portmap exhausted");
                return None;
            };
            write_call_id(&mut buf[payload_off..], trans_id);
            None
        }
        CTRL_OUTGOING_CALL_REPLY => {
            let trans_call_id = read_peer_call_id(payload)?;
            let server_call_id = read_call_id(payload)?;
            let (orig_client_id, idx) = ctx.translate_call_reply(trans_call_id, server_call_id)?;
            write_peer_call_id(&mut buf[payload_off..], orig_client_id);
            if ctx.mark_established(idx) {
                Some(PptpEstablished {
                    ctx: ctx.clone(),
                    slot: idx,
                    client_addr: binding.orig_addr,
                    server_addr: ctx.server_addr,
                    alen: ctx.alen,
                    server_call_id,
                    trans_call_id,
                })
            } else {
                None
            }
        }
        CTRL_CALL_DISCONNECT_NOTIFY | CTRL_WAN_ERROR_NOTIFY => {
            if let Some(call_id) = read_call_id(payload) {
                ctx.disconnect(&binding.policy.portmap, call_id);
            }
            None
        }
        CTRL_CALL_CLEAR_REQUEST => {
            debug!("pptp: call-clear-request observed, no portmap action taken");
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nat::policy::{NatKind, NatPolicy};

    fn server() -> (Addr, u8) {
        (Addr::from_ipv4("203.0.113.5".parse().unwrap()), 4)
    }

    fn build_ctrl_tcp_v4(ctrl_type: u16, call_id: u16, peer_call_id: u16) -> Vec<u8> {
        let min_len = if ctrl_type == CTRL_OUTGOING_CALL_REQUEST {
            PPTP_MIN_OCR_LEN
        } else {
            PPTP_HDR_LEN + 4
        };
        let mut buf = vec![0u8; TCP_HDR_LEN + 20 + min_len];
        buf[0] = 0x45;
        buf[9] = proto::IPPROTO_TCP;
        buf[12..16].copy_from_slice(&[10, 0, 0, 1]);
        buf[16..20].copy_from_slice(&[203, 0, 113, 5]);
        let tcp_off = 20;
        buf[tcp_off..tcp_off + 2].copy_from_slice(&12345u16.to_be_bytes());
        buf[tcp_off + 2..tcp_off + 4].copy_from_slice(&proto::PPTP_CTRL_PORT.to_be_bytes());
        buf[tcp_off + 12] = (TCP_HDR_LEN as u8 / 4) << 4;

        let payload_off = tcp_off + TCP_HDR_LEN;
        let p = &mut buf[payload_off..];
        p[2..4].copy_from_slice(&1u16.to_be_bytes());
        p[4..8].copy_from_slice(&PPTP_MAGIC_COOKIE.to_be_bytes());
        p[8..10].copy_from_slice(&ctrl_type.to_be_bytes());
        write_call_id(p, call_id);
        write_peer_call_id(p, peer_call_id);
        buf
    }

    #[test]
    fn tcp_fixup_rewrites_call_request_then_reply_round_trip() {
        let (server_addr, alen) = server();
        let pool = vec![(server_addr, alen)];
        let policy = Arc::new(NatPolicy::new(NatKind::Src, pool, 40000, 40010, 0));
        let ctx = Arc::new(PptpTcpContext::new(server_addr, alen));
        let binding = NatBinding {
            orig_addr: Addr::from_ipv4("10.0.0.1".parse().unwrap()),
            orig_id: 0,
            trans_addr: server_addr,
            trans_id: 0,
            policy: policy.clone(),
            alg: AlgState::PptpTcp(ctx.clone()),
        };

        let mut req_buf = build_ctrl_tcp_v4(CTRL_OUTGOING_CALL_REQUEST, 0x1111, 0);
        let npc = crate::npc::Npc::cache(&req_buf, 0).expect("parse");
        apply_tcp_fixup(&binding, &npc, &mut req_buf);
        let payload_off = npc.l4_off + TCP_HDR_LEN;
        let trans_id = read_call_id(&req_buf[payload_off..]).unwrap();
        assert_ne!(trans_id, 0x1111);
        assert_eq!(ctx.slot(0).state, SlotState::Used);

        let mut reply_buf = build_ctrl_tcp_v4(CTRL_OUTGOING_CALL_REPLY, 0x2222, trans_id);
        let npc2 = crate::npc::Npc::cache(&reply_buf, 0).expect("parse");
        apply_tcp_fixup(&binding, &npc2, &mut reply_buf);
        let payload_off2 = npc2.l4_off + TCP_HDR_LEN;
        let restored_peer_id = read_peer_call_id(&reply_buf[payload_off2..]).unwrap();
        assert_eq!(restored_peer_id, 0x1111);
        assert_eq!(ctx.slot(0).state, SlotState::Established);
    }

    #[test]
    fn full_call_setup_and_teardown() {
        let portmap = Portmap::new(10000, 10010);
        let (server_addr, alen) = server();
        let ctx = PptpTcpContext::new(server_addr, alen);

        let trans_id = ctx.translate_call_request(&portmap, 0x1111).expect("slot");
        assert_eq!(ctx.slot(0).state, SlotState::Used);

        let (orig_id, idx) = ctx
            .translate_call_reply(trans_id, 0x2222)
            .expect("matching slot");
        assert_eq!(orig_id, 0x1111);
        assert_eq!(ctx.slot(idx).state, SlotState::UsedServerId);

        ctx.mark_established(idx);
        assert_eq!(ctx.slot(idx).state, SlotState::Established);
        assert_eq!(ctx.find_by_server_call_id(0x2222), Some(idx));

        let freed = ctx.disconnect(&portmap, trans_id).expect("freed slot");
        assert_eq!(freed.server_call_id, 0x2222);
        assert_eq!(ctx.slot(idx).state, SlotState::Free);
        assert_eq!(portmap.in_use_count(server_addr, alen), 0);
    }

    #[test]
    fn n_requests_then_n_disconnects_empties_portmap() {
        let portmap = Portmap::new(20000, 20010);
        let (server_addr, alen) = server();
        let ctx = PptpTcpContext::new(server_addr, alen);

        let ids: Vec<u16> = (0..4)
            .map(|i| ctx.translate_call_request(&portmap, i).unwrap())
            .collect();
        assert_eq!(portmap.in_use_count(server_addr, alen), 4);

        for id in ids {
            ctx.disconnect(&portmap, id).expect("slot present");
        }
        assert_eq!(portmap.in_use_count(server_addr, alen), 0);
    }

    #[test]
    fn fifth_request_fails_when_all_slots_used() {
        let portmap = Portmap::new(30000, 30010);
        let (server_addr, alen) = server();
        let ctx = PptpTcpContext::new(server_addr, alen);
        for i in 0..4 {
            ctx.translate_call_request(&portmap, i).unwrap();
        }
        assert!(ctx.translate_call_request(&portmap, 99).is_none());
    }

    #[test]
    fn ctrl_header_rejects_bad_magic() {
        let mut buf = vec![0u8; 32];
        buf[2..4].copy_from_slice(&1u16.to_be_bytes());
        buf[4..8].copy_from_slice(&0xDEADBEEFu32.to_be_bytes());
        assert!(parse_ctrl_header(&buf).is_none());
    }

    #[test]
    fn ctrl_header_parses_outgoing_call_request() {
        let mut buf = vec![0u8; 32];
        buf[2..4].copy_from_slice(&1u16.to_be_bytes());
        buf[4..8].copy_from_slice(&PPTP_MAGIC_COOKIE.to_be_bytes());
        buf[8..10].copy_from_slice(&CTRL_OUTGOING_CALL_REQUEST.to_be_bytes());
        buf[PPTP_HDR_LEN..PPTP_HDR_LEN + 2].copy_from_slice(&0x1111u16.to_be_bytes());
        assert_eq!(parse_ctrl_header(&buf), Some(CTRL_OUTGOING_CALL_REQUEST));
        assert_eq!(read_call_id(&buf), Some(0x1111));
    }
}
