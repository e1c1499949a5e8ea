//! The packet cache (`npc`): an ephemeral per-packet record built by parsing
//! just enough of a packet to classify it (§4.1, §3 "Packet cache").
//!
//! A [`Npc`] is re-created (or [`Npc::recache`]d) once per pipeline
//! traversal; it never outlives a single packet.

use crate::addr::Addr;
use crate::proto;

/// Which fields of the cache are populated, mirroring the original's
/// `NPC_IP4`/`NPC_IP6`/`NPC_LAYER4`/... bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct CacheInfo(u16);

impl CacheInfo {
    pub const NONE: CacheInfo = CacheInfo(0);
    pub const IP4: CacheInfo = CacheInfo(1 << 0);
    pub const IP6: CacheInfo = CacheInfo(1 << 1);
    pub const LAYER4: CacheInfo = CacheInfo(1 << 2);
    pub const TCP: CacheInfo = CacheInfo(1 << 3);
    pub const UDP: CacheInfo = CacheInfo(1 << 4);
    pub const ICMP: CacheInfo = CacheInfo(1 << 5);
    pub const GRE_ENHANCED: CacheInfo = CacheInfo(1 << 6);
    pub const PPTP_GRE_CTX: CacheInfo = CacheInfo(1 << 7);

    pub fn contains(self, other: CacheInfo) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn insert(&mut self, other: CacheInfo) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for CacheInfo {
    type Output = CacheInfo;
    fn bitor(self, rhs: CacheInfo) -> CacheInfo {
        CacheInfo(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    In,
    Out,
}

/// An L4 identifier: TCP/UDP port, ICMP query id, or GRE call id (§3).
pub type Id = u16;

#[derive(Clone, Debug)]
pub struct Npc {
    pub alen: u8,
    pub l3_off: usize,
    pub l4_off: usize,
    pub proto: u8,
    pub src_addr: Addr,
    pub dst_addr: Addr,
    pub src_id: Id,
    pub dst_id: Id,
    pub info: CacheInfo,
    pub tcp_flags: u8,
    pub tcp_seq: u32,
    pub tcp_ack: u32,
    pub tcp_win: u16,
    /// Override connection key, set by an ALG's `inspect` hook when the
    /// standard 5-tuple does not identify the flow (§4.8, PPTP enhanced GRE).
    pub key_override: Option<crate::conndb::key::ConnectionKey>,
}

impl Default for Npc {
    fn default() -> Self {
        Npc {
            alen: 0,
            l3_off: 0,
            l4_off: 0,
            proto: 0,
            src_addr: Addr::ZERO,
            dst_addr: Addr::ZERO,
            src_id: 0,
            dst_id: 0,
            info: CacheInfo::NONE,
            tcp_flags: 0,
            tcp_seq: 0,
            tcp_ack: 0,
            tcp_win: 0,
            key_override: None,
        }
    }
}

impl Npc {
    /// Parses `buf` starting at `l3_off` (the caller has already stripped any
    /// L2 header). Unsupported L4 protocols still populate L3 info so the
    /// pipeline can route them; see §4.1.
    pub fn cache(buf: &[u8], l3_off: usize) -> Option<Npc> {
        if buf.len() < l3_off + 1 {
            return None;
        }
        let version = buf[l3_off] >> 4;
        match version {
            4 => Self::cache_v4(buf, l3_off),
            6 => Self::cache_v6(buf, l3_off),
            _ => None,
        }
    }

    fn cache_v4(buf: &[u8], l3_off: usize) -> Option<Npc> {
        if buf.len() < l3_off + 20 {
            return None;
        }
        let hdr = &buf[l3_off..];
        let ihl = (hdr[0] & 0x0f) as usize * 4;
        if ihl < 20 || buf.len() < l3_off + ihl {
            return None;
        }
        let proto = hdr[9];
        let src = Addr::from_ipv4([hdr[12], hdr[13], hdr[14], hdr[15]].into());
        let dst = Addr::from_ipv4([hdr[16], hdr[17], hdr[18], hdr[19]].into());
        let l4_off = l3_off + ihl;

        let mut npc = Npc {
            alen: crate::addr::ALEN_INET,
            l3_off,
            l4_off,
            proto,
            src_addr: src,
            dst_addr: dst,
            info: CacheInfo::IP4,
            ..Default::default()
        };
        Self::cache_l4(buf, &mut npc);
        Some(npc)
    }

    fn cache_v6(buf: &[u8], l3_off: usize) -> Option<Npc> {
        if buf.len() < l3_off + 40 {
            return None;
        }
        let hdr = &buf[l3_off..];
        let proto = hdr[6];
        let mut src_b = [0u8; 16];
        src_b.copy_from_slice(&hdr[8..24]);
        let mut dst_b = [0u8; 16];
        dst_b.copy_from_slice(&hdr[24..40]);
        let l4_off = l3_off + 40;

        let mut npc = Npc {
            alen: crate::addr::ALEN_INET6,
            l3_off,
            l4_off,
            proto,
            src_addr: Addr(src_b),
            dst_addr: Addr(dst_b),
            info: CacheInfo::IP6,
            ..Default::default()
        };
        Self::cache_l4(buf, &mut npc);
        Some(npc)
    }

    fn cache_l4(buf: &[u8], npc: &mut Npc) {
        let off = npc.l4_off;
        match npc.proto {
            proto::IPPROTO_TCP => {
                if buf.len() < off + 20 {
                    return;
                }
                let h = &buf[off..];
                npc.src_id = u16::from_be_bytes([h[0], h[1]]);
                npc.dst_id = u16::from_be_bytes([h[2], h[3]]);
                npc.tcp_seq = u32::from_be_bytes([h[4], h[5], h[6], h[7]]);
                npc.tcp_ack = u32::from_be_bytes([h[8], h[9], h[10], h[11]]);
                npc.tcp_flags = h[13];
                npc.tcp_win = u16::from_be_bytes([h[14], h[15]]);
                npc.info.insert(CacheInfo::LAYER4 | CacheInfo::TCP);
            }
            proto::IPPROTO_UDP => {
                if buf.len() < off + 8 {
                    return;
                }
                let h = &buf[off..];
                npc.src_id = u16::from_be_bytes([h[0], h[1]]);
                npc.dst_id = u16::from_be_bytes([h[2], h[3]]);
                npc.info.insert(CacheInfo::LAYER4 | CacheInfo::UDP);
            }
            proto::IPPROTO_ICMP | proto::IPPROTO_ICMPV6 => {
                if buf.len() < off + 8 {
                    return;
                }
                let h = &buf[off..];
                let icmp_type = h[0];
                // Query id lives at the same offset for echo request/reply on
                // both ICMP and ICMPv6.
                if matches!(icmp_type, 0 | 8 | 128 | 129) {
                    let id = u16::from_be_bytes([h[4], h[5]]);
                    npc.src_id = id;
                    npc.dst_id = id;
                }
                npc.info.insert(CacheInfo::LAYER4 | CacheInfo::ICMP);
            }
            proto::IPPROTO_GRE => {
                if buf.len() < off + 4 {
                    return;
                }
                let h = &buf[off..];
                let flags_ver = u16::from_be_bytes([h[0], h[1]]);
                if flags_ver & 0x7 == 1 {
                    // Enhanced GRE (PPTP): call id sits after the mandatory
                    // fields; exact layout handled by the PPTP ALG inspector,
                    // which overrides the connection key directly.
                    npc.info.insert(CacheInfo::LAYER4 | CacheInfo::GRE_ENHANCED);
                }
            }
            _ => {
                // Unsupported L4 protocol: only L3 info is recorded, per §4.1.
            }
        }
    }
}
