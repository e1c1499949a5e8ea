//! NAT policy: the translation rule attached to a ruleset rule (§4.7).

use crate::addr::Addr;
use crate::nat::portmap::Portmap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NatKind {
    Src,
    Dst,
}

pub struct NatPolicy {
    pub kind: NatKind,
    pub pool: Vec<(Addr, u8)>,
    pub port_lo: u16,
    pub port_hi: u16,
    pub flags: u8,
    pub portmap: Portmap,
    rr_idx: AtomicUsize,
}

impl NatPolicy {
    pub fn new(kind: NatKind, pool: Vec<(Addr, u8)>, port_lo: u16, port_hi: u16, flags: u8) -> Self {
        NatPolicy {
            kind,
            pool,
            port_lo,
            port_hi,
            flags,
            portmap: Portmap::new(port_lo, port_hi),
            rr_idx: AtomicUsize::new(0),
        }
    }

    /// Round-robin address selection from the pool (§4.7 step 1).
    pub fn next_addr(&self) -> Option<(Addr, u8)> {
        if self.pool.is_empty() {
            return None;
        }
        let i = self.rr_idx.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        Some(self.pool[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_across_pool() {
        let pool = vec![
            (Addr::from_ipv4("198.51.100.1".parse().unwrap()), 4),
            (Addr::from_ipv4("198.51.100.2".parse().unwrap()), 4),
        ];
        let policy = NatPolicy::new(NatKind::Src, pool.clone(), 1024, 2048, 0);
        assert_eq!(policy.next_addr(), Some(pool[0]));
        assert_eq!(policy.next_addr(), Some(pool[1]));
        assert_eq!(policy.next_addr(), Some(pool[0]));
    }
}
