//! External collaborator traits (§6, §1 "deliberately out of scope"): the
//! NIC driver, the ARP/neighbor resolver, and the routing table. This
//! crate only defines and consumes these traits; no real driver, resolver,
//! or routing table is implemented here.

use crate::addr::Addr;

/// An opaque packet buffer (§6 "buffer objects are opaque, support alloc,
/// free, data_ptr, length, next, prepend, linearize"). This crate only
/// needs the linearized-contiguous view; scatter-gather chains are the
/// driver's concern.
#[derive(Clone, Debug, Default)]
pub struct Buf {
    pub data: Vec<u8>,
}

impl Buf {
    pub fn new(data: Vec<u8>) -> Self {
        Buf { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Prepends bytes (e.g. an L2 header) in front of the existing payload.
    pub fn prepend(&mut self, header: &[u8]) {
        let mut out = Vec::with_capacity(header.len() + self.data.len());
        out.extend_from_slice(header);
        out.extend_from_slice(&self.data);
        self.data = out;
    }
}

/// The NIC driver abstraction (§6): burst receive/transmit over a
/// (port, queue) pair.
pub trait NicOps: Send + Sync {
    fn rx_burst(&self, port: u16, queue: u16, max: usize) -> Vec<Buf>;
    fn tx_burst(&self, port: u16, queue: u16, bufs: Vec<Buf>) -> usize;
}

/// A resolved link-layer address (e.g. an Ethernet MAC), opaque to this
/// crate beyond its byte representation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct LinkAddr(pub [u8; 6]);

#[derive(Clone, Copy, Debug)]
pub struct RouteHop {
    pub egress_if: u16,
    pub next_hop: Addr,
    pub alen: u8,
}

/// The ARP/neighbor resolver (§6): `resolve` returns a cached link address
/// or signals the caller to retry once an out-of-band resolution (fed by
/// `arp_input`, which lives entirely in the driver/resolver collaborator)
/// completes.
pub trait Resolver: Send + Sync {
    fn resolve(&self, route: &RouteHop) -> Option<LinkAddr>;
}

/// The routing-table collaborator (§6): longest-prefix-match lookup.
pub trait RoutingTable: Send + Sync {
    fn lookup(&self, addr: &Addr, alen: u8) -> Option<RouteHop>;
}

/// In-memory test doubles for the three collaborators above (§9 "`System`
/// ... a pluggable NicOps/Resolver/RoutingTable, the out-of-scope
/// collaborators are trait objects with a simple in-memory test double
/// shipped for demos and tests").
pub mod testutil {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct QueueNic {
        rx: Mutex<HashMap<(u16, u16), Vec<Buf>>>,
        tx: Mutex<HashMap<(u16, u16), Vec<Buf>>>,
    }

    impl QueueNic {
        pub fn new() -> Self {
            QueueNic::default()
        }

        pub fn push_rx(&self, port: u16, queue: u16, buf: Buf) {
            self.rx.lock().entry((port, queue)).or_default().push(buf);
        }

        pub fn drain_tx(&self, port: u16, queue: u16) -> Vec<Buf> {
            self.tx.lock().remove(&(port, queue)).unwrap_or_default()
        }
    }

    impl NicOps for QueueNic {
        fn rx_burst(&self, port: u16, queue: u16, max: usize) -> Vec<Buf> {
            let mut rx = self.rx.lock();
            let Some(q) = rx.get_mut(&(port, queue)) else {
                return Vec::new();
            };
            let n = max.min(q.len());
            q.drain(..n).collect()
        }

        fn tx_burst(&self, port: u16, queue: u16, bufs: Vec<Buf>) -> usize {
            let n = bufs.len();
            self.tx.lock().entry((port, queue)).or_default().extend(bufs);
            n
        }
    }

    #[derive(Default)]
    pub struct StaticResolver {
        pub answer: Option<LinkAddr>,
    }

    impl Resolver for StaticResolver {
        fn resolve(&self, _route: &RouteHop) -> Option<LinkAddr> {
            self.answer
        }
    }

    #[derive(Default)]
    pub struct StaticRoutingTable {
        routes: Mutex<Vec<(Addr, u8, u8, RouteHop)>>,
    }

    impl StaticRoutingTable {
        pub fn new() -> Self {
            StaticRoutingTable::default()
        }

        pub fn add_route(&self, prefix: Addr, prefix_len: u8, alen: u8, hop: RouteHop) {
            self.routes.lock().push((prefix, prefix_len, alen, hop));
        }
    }

    impl RoutingTable for StaticRoutingTable {
        fn lookup(&self, addr: &Addr, alen: u8) -> Option<RouteHop> {
            let routes = self.routes.lock();
            routes
                .iter()
                .filter(|(_, _, ralen, _)| *ralen == alen)
                .filter(|(prefix, prefix_len, _, _)| masked_eq(prefix, addr, alen, *prefix_len))
                .max_by_key(|(_, prefix_len, _, _)| *prefix_len)
                .map(|(_, _, _, hop)| *hop)
        }
    }

    /// Longest-prefix covers check, local to the test routing table (kept
    /// separate from `table::lpm`'s private helper of the same shape).
    fn masked_eq(a: &Addr, b: &Addr, alen: u8, mask: u8) -> bool {
        let full_bytes = (mask / 8) as usize;
        let rem_bits = mask % 8;
        let a_bytes = a.as_slice(alen);
        let b_bytes = b.as_slice(alen);
        if a_bytes[..full_bytes] != b_bytes[..full_bytes] {
            return false;
        }
        if rem_bits == 0 {
            return true;
        }
        let shift = 8 - rem_bits;
        (a_bytes[full_bytes] >> shift) == (b_bytes[full_bytes] >> shift)
    }
}
