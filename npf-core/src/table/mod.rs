//! The table layer (§4.2, §9): a uniform `{insert, remove, lookup, list,
//! flush}` contract over four storage variants. Represented as a tagged
//! enum with inherent dispatch, not a trait-object hierarchy, per §9's
//! explicit "do not share implementation via inheritance."

pub mod constant;
pub mod ifaddr;
pub mod ipset;
pub mod lpm;

pub use constant::ConstTable;
pub use ifaddr::IfAddrTable;
pub use ipset::IpSet;
pub use lpm::Lpm;

use crate::addr::Addr;
use crate::error::{ConfigError, Result};

pub enum Table {
    IpSet(IpSet),
    Lpm(Lpm),
    Const(ConstTable),
    IfAddr(IfAddrTable),
}

impl Table {
    pub fn new_ipset(alen: u8) -> Table {
        Table::IpSet(IpSet::new(alen))
    }

    pub fn new_lpm(alen: u8) -> Table {
        Table::Lpm(Lpm::new(alen))
    }

    pub fn new_const(entries: Vec<Addr>) -> Table {
        Table::Const(ConstTable::build(entries))
    }

    pub fn new_ifaddr() -> Table {
        Table::IfAddr(IfAddrTable::new())
    }

    pub fn insert(&self, addr: Addr, mask: u8) -> Result<()> {
        match self {
            Table::IpSet(t) => t.insert(addr, mask),
            Table::Lpm(t) => t.insert(addr, mask),
            Table::Const(t) => t.insert(addr, mask),
            Table::IfAddr(t) => t.insert(addr, mask),
        }
    }

    pub fn remove(&self, addr: Addr, mask: u8) -> Result<()> {
        match self {
            Table::IpSet(t) => t.remove(addr, mask),
            Table::Lpm(t) => t.remove(addr, mask),
            Table::Const(t) => t.remove(addr, mask),
            Table::IfAddr(t) => t.remove(addr, mask),
        }
    }

    /// Exact match (IpSet, Const, IfAddr) or longest-prefix match (Lpm),
    /// per the variant's own semantics (§4.2).
    pub fn lookup(&self, addr: &Addr) -> bool {
        match self {
            Table::IpSet(t) => t.lookup(addr),
            Table::Lpm(t) => t.lookup(addr),
            Table::Const(t) => t.lookup(addr),
            Table::IfAddr(t) => t.lookup(addr),
        }
    }

    pub fn list(&self) -> Vec<(Addr, u8)> {
        match self {
            Table::IpSet(t) => t.list(),
            Table::Lpm(t) => t.list(),
            Table::Const(t) => t.list(crate::addr::NO_MASK),
            Table::IfAddr(t) => t.list(crate::addr::NO_MASK),
        }
    }

    pub fn flush(&self) -> Result<()> {
        match self {
            Table::IpSet(t) => {
                t.flush();
                Ok(())
            }
            Table::Lpm(t) => {
                t.flush();
                Ok(())
            }
            Table::Const(_) => Err(ConfigError::Invalid("constant table is read-only".into())),
            Table::IfAddr(t) => {
                t.flush();
                Ok(())
            }
        }
    }
}

/// The table registry a `System` holds, keyed by the small integer table id
/// the BPF coprocessor's `TABLE_LOOKUP` call carries (§4.3).
#[derive(Default)]
pub struct TableRegistry {
    tables: std::collections::HashMap<u16, Table>,
}

impl TableRegistry {
    pub fn new() -> Self {
        TableRegistry::default()
    }

    pub fn insert_table(&mut self, id: u16, table: Table) -> Result<()> {
        if self.tables.contains_key(&id) {
            return Err(ConfigError::Exist(format!("table id {id}")));
        }
        self.tables.insert(id, table);
        Ok(())
    }

    pub fn get(&self, id: u16) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn lookup(&self, id: u16, addr: &Addr) -> bool {
        self.tables.get(&id).is_some_and(|t| t.lookup(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipset_variant_round_trips_through_the_enum() {
        let t = Table::new_ipset(4);
        let a = Addr::from_ipv4("10.1.1.1".parse().unwrap());
        t.insert(a, crate::addr::NO_MASK).unwrap();
        assert!(t.lookup(&a));
        t.remove(a, crate::addr::NO_MASK).unwrap();
        assert!(!t.lookup(&a));
    }

    #[test]
    fn registry_rejects_duplicate_table_ids() {
        let mut reg = TableRegistry::new();
        reg.insert_table(1, Table::new_ipset(4)).unwrap();
        assert!(matches!(
            reg.insert_table(1, Table::new_lpm(4)),
            Err(ConfigError::Exist(_))
        ));
    }

    #[test]
    fn registry_lookup_dispatches_to_the_right_table() {
        let mut reg = TableRegistry::new();
        reg.insert_table(7, Table::new_ipset(4)).unwrap();
        let a = Addr::from_ipv4("10.1.1.1".parse().unwrap());
        reg.get(7).unwrap().insert(a, crate::addr::NO_MASK).unwrap();
        assert!(reg.lookup(7, &a));
        assert!(!reg.lookup(7, &Addr::from_ipv4("10.1.1.2".parse().unwrap())));
        assert!(!reg.lookup(99, &a));
    }
}
