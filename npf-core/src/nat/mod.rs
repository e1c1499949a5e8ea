//! Network address translation (§4.7): policy-driven binding creation and
//! per-packet address/port rewrite with incremental checksum fixups.

pub mod binding;
pub mod checksum;
pub mod policy;
pub mod portmap;

pub use binding::{AlgState, NatBinding};
pub use policy::{NatKind, NatPolicy};
pub use portmap::Portmap;

use crate::addr::Addr;
use crate::npc::{CacheInfo, Npc};
use crate::proto;
use std::sync::Arc;

/// Step 1-3 of §4.7: picks a pool address, allocates a translated port/id,
/// and returns the binding to attach to the newly created connection.
/// Fails (and the caller should bump a `nat_alloc_fail` counter) when the
/// pool is empty or the portmap is exhausted.
pub fn create_binding(policy: &Arc<NatPolicy>, npc: &Npc) -> Option<NatBinding> {
    let (trans_addr, alen) = policy.next_addr()?;
    let trans_id = policy.portmap.allocate(trans_addr, alen)?;
    let (orig_addr, orig_id) = match policy.kind {
        NatKind::Src => (npc.src_addr, npc.src_id),
        NatKind::Dst => (npc.dst_addr, npc.dst_id),
    };
    Some(NatBinding::new(orig_addr, orig_id, trans_addr, trans_id, policy.clone()))
}

fn addr_offset(l3_off: usize, alen: u8, is_src: bool) -> usize {
    match (alen, is_src) {
        (4, true) => l3_off + 12,
        (4, false) => l3_off + 16,
        (_, true) => l3_off + 8,
        (_, false) => l3_off + 24,
    }
}

/// Rewrites one endpoint (address + L4 id) of a packet in place and fixes
/// up the IPv4 header checksum and L4 checksum incrementally. `is_src`
/// selects which endpoint of the packet to rewrite; the caller decides
/// this from the NAT kind and packet direction.
pub fn rewrite_endpoint(
    npc: &Npc,
    buf: &mut [u8],
    is_src: bool,
    new_addr: Addr,
    new_id: u16,
) {
    let alen = npc.alen;
    let a_off = addr_offset(npc.l3_off, alen, is_src);
    let old_addr_words = checksum::be_words(&buf[a_off..a_off + alen as usize]);
    let new_addr_bytes = new_addr.as_slice(alen);
    let new_addr_words = checksum::be_words(new_addr_bytes);
    buf[a_off..a_off + alen as usize].copy_from_slice(new_addr_bytes);

    if alen == 4 {
        let ip_csum_off = npc.l3_off + 10;
        let old_csum = u16::from_be_bytes([buf[ip_csum_off], buf[ip_csum_off + 1]]);
        let fixed = checksum::fixup_words(old_csum, &old_addr_words, &new_addr_words);
        buf[ip_csum_off..ip_csum_off + 2].copy_from_slice(&fixed.to_be_bytes());
    }

    if !npc.info.contains(CacheInfo::LAYER4) {
        return;
    }

    let id_off = npc.l4_off + if is_src { 0 } else { 2 };
    let old_id = match npc.proto {
        proto::IPPROTO_TCP | proto::IPPROTO_UDP => {
            u16::from_be_bytes([buf[id_off], buf[id_off + 1]])
        }
        _ => 0,
    };

    let l4_csum_off = match npc.proto {
        proto::IPPROTO_TCP => Some(npc.l4_off + 16),
        proto::IPPROTO_UDP => Some(npc.l4_off + 6),
        proto::IPPROTO_ICMP | proto::IPPROTO_ICMPV6 => Some(npc.l4_off + 2),
        _ => None,
    };

    match npc.proto {
        proto::IPPROTO_TCP | proto::IPPROTO_UDP => {
            buf[id_off..id_off + 2].copy_from_slice(&new_id.to_be_bytes());
        }
        proto::IPPROTO_ICMP | proto::IPPROTO_ICMPV6 => {
            // Query id lives at a fixed offset regardless of direction.
            let icmp_id_off = npc.l4_off + 4;
            buf[icmp_id_off..icmp_id_off + 2].copy_from_slice(&new_id.to_be_bytes());
        }
        _ => {}
    }

    if let Some(csum_off) = l4_csum_off {
        let old_csum = u16::from_be_bytes([buf[csum_off], buf[csum_off + 1]]);
        let mut fixed = old_csum;
        match npc.proto {
            proto::IPPROTO_TCP | proto::IPPROTO_UDP => {
                fixed = checksum::fixup_words(fixed, &old_addr_words, &new_addr_words);
                fixed = checksum::fixup16(fixed, old_id, new_id);
            }
            proto::IPPROTO_ICMP | proto::IPPROTO_ICMPV6 => {
                let old_icmp_id = u16::from_be_bytes([
                    buf[npc.l4_off + 4],
                    buf[npc.l4_off + 5],
                ]);
                fixed = checksum::fixup16(fixed, old_icmp_id, new_id);
            }
            _ => {}
        }
        buf[csum_off..csum_off + 2].copy_from_slice(&fixed.to_be_bytes());
    }
}

/// Per-packet translation (§4.7 "Per-packet translation"): rewrites source
/// (outbound) or destination (inbound) address/id depending on policy kind
/// and packet direction, then re-caches the packet for downstream steps.
pub fn translate_packet(
    npc: &mut Npc,
    buf: &mut [u8],
    binding: &NatBinding,
    outbound: bool,
) {
    let is_src = match (binding.policy.kind, outbound) {
        (NatKind::Src, true) => true,
        (NatKind::Dst, false) => false,
        _ => return,
    };
    rewrite_endpoint(npc, buf, is_src, binding.trans_addr, binding.trans_id);
    if let Some(recached) = Npc::cache(buf, npc.l3_off) {
        *npc = recached;
    }
}

/// The reverse rewrite applied to return traffic, restoring the original
/// address/id so the binding's translation is undone on the way back in.
pub fn untranslate_packet(npc: &mut Npc, buf: &mut [u8], binding: &NatBinding, outbound: bool) {
    let is_dst = match (binding.policy.kind, outbound) {
        (NatKind::Src, false) => true,
        (NatKind::Dst, true) => false,
        _ => return,
    };
    rewrite_endpoint(npc, buf, !is_dst, binding.orig_addr, binding.orig_id);
    if let Some(recached) = Npc::cache(buf, npc.l3_off) {
        *npc = recached;
    }
}
