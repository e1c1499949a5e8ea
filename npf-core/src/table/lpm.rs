//! Longest-prefix-match table (§4.2). Lookups take the table's internal
//! lock, per the spec's explicit exception to the otherwise lock-free
//! table contract.

use crate::addr::{table_cidr_check, Addr};
use crate::error::{ConfigError, Result};
use parking_lot::Mutex;

#[derive(Clone, Copy)]
struct Prefix {
    addr: Addr,
    mask: u8,
}

impl Prefix {
    fn covers(&self, alen: u8, addr: &Addr) -> bool {
        masked_eq(&self.addr, addr, alen, self.mask)
    }
}

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

pub struct Lpm {
    alen: u8,
    entries: Mutex<Vec<Prefix>>,
}

impl Lpm {
    pub fn new(alen: u8) -> Self {
        Lpm {
            alen,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, addr: Addr, mask: u8) -> Result<()> {
        if !table_cidr_check(self.alen, mask) {
            return Err(ConfigError::Invalid(format!("mask {mask} invalid for alen {}", self.alen)));
        }
        let mut entries = self.entries.lock();
        if entries.iter().any(|p| p.mask == mask && p.covers(self.alen, &addr)) {
            return Err(ConfigError::Exist(format!("{addr:?}/{mask}")));
        }
        entries.push(Prefix { addr, mask });
        Ok(())
    }

    pub fn remove(&self, addr: Addr, mask: u8) -> Result<()> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|p| !(p.mask == mask && p.covers(self.alen, &addr)));
        if entries.len() == before {
            return Err(ConfigError::NotFound(format!("{addr:?}/{mask}")));
        }
        Ok(())
    }

    /// Longest-prefix match: the covering entry with the largest mask wins.
    pub fn lookup(&self, addr: &Addr) -> bool {
        let entries = self.entries.lock();
        entries.iter().any(|p| p.covers(self.alen, addr))
    }

    pub fn list(&self) -> Vec<(Addr, u8)> {
        self.entries.lock().iter().map(|p| (p.addr, p.mask)).collect()
    }

    pub fn flush(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn ipv6_prefix_hit_and_outside_miss() {
        let lpm = Lpm::new(16);
        let prefix: Ipv6Addr = "fe80::0203:c0ff:0000:0000".parse().unwrap();
        lpm.insert(Addr::from_ipv6(prefix), 32).unwrap();

        let inside: Ipv6Addr = "fe80::0203:c0ff:fe10:1234".parse().unwrap();
        assert!(lpm.lookup(&Addr::from_ipv6(inside)));

        lpm.remove(Addr::from_ipv6(prefix), 32).unwrap();
        assert!(!lpm.lookup(&Addr::from_ipv6(inside)));
    }

    #[test]
    fn narrower_mask_excludes_addresses_outside_it() {
        let lpm = Lpm::new(16);
        let base: Ipv6Addr = "2001:db8::".parse().unwrap();
        lpm.insert(Addr::from_ipv6(base), 126).unwrap();

        let inside: Ipv6Addr = "2001:db8::3".parse().unwrap();
        assert!(lpm.lookup(&Addr::from_ipv6(inside)));

        let outside: Ipv6Addr = "2001:db8::4".parse().unwrap();
        assert!(!lpm.lookup(&Addr::from_ipv6(outside)));
    }

    #[test]
    fn multiple_prefix_widths_all_hit() {
        let lpm = Lpm::new(16);
        let a: Ipv6Addr = "2001:db8::".parse().unwrap();
        lpm.insert(Addr::from_ipv6(a), 32).unwrap();
        lpm.insert(Addr::from_ipv6(a), 96).unwrap();
        lpm.insert(Addr::from_ipv6(a), 126).unwrap();

        let probe: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert!(lpm.lookup(&Addr::from_ipv6(probe)));
    }
}
