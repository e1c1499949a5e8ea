//! Read-only constant table (§4.2): a bulk, immutable address set, looked
//! up by binary search over a sorted blob.

use crate::addr::Addr;
use crate::error::{ConfigError, Result};

pub struct ConstTable {
    entries: Vec<Addr>,
}

impl ConstTable {
    /// Builds the table once from a bulk load; entries are sorted so
    /// `lookup` can binary search.
    pub fn build(mut entries: Vec<Addr>) -> Self {
        entries.sort();
        entries.dedup();
        ConstTable { entries }
    }

    pub fn insert(&self, _addr: Addr, _mask: u8) -> Result<()> {
        Err(ConfigError::Invalid("constant table is read-only".into()))
    }

    pub fn remove(&self, _addr: Addr, _mask: u8) -> Result<()> {
        Err(ConfigError::Invalid("constant table is read-only".into()))
    }

    pub fn lookup(&self, addr: &Addr) -> bool {
        self.entries.binary_search(addr).is_ok()
    }

    pub fn list(&self, mask: u8) -> Vec<(Addr, u8)> {
        self.entries.iter().map(|a| (*a, mask)).collect()
    }

    pub fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_search_finds_loaded_entries_only() {
        let a = Addr::from_ipv4("10.0.0.1".parse().unwrap());
        let b = Addr::from_ipv4("10.0.0.2".parse().unwrap());
        let c = Addr::from_ipv4("10.0.0.3".parse().unwrap());
        let table = ConstTable::build(vec![a, c]);
        assert!(table.lookup(&a));
        assert!(table.lookup(&c));
        assert!(!table.lookup(&b));
    }

    #[test]
    fn mutation_always_fails() {
        let table = ConstTable::build(vec![]);
        let a = Addr::from_ipv4("10.0.0.1".parse().unwrap());
        assert!(table.insert(a, crate::addr::NO_MASK).is_err());
        assert!(table.remove(a, crate::addr::NO_MASK).is_err());
    }
}
