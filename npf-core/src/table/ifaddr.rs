//! Interface-address table (§4.2): a small, linearly-scanned list swapped
//! atomically when the interface is reconfigured.

use crate::addr::Addr;
use crate::error::{ConfigError, Result};
use arc_swap::ArcSwap;
use std::sync::Arc;

pub struct IfAddrTable {
    entries: ArcSwap<Vec<Addr>>,
}

impl Default for IfAddrTable {
    fn default() -> Self {
        IfAddrTable {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl IfAddrTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends without deduplication, per §4.2's table.
    pub fn insert(&self, addr: Addr, _mask: u8) -> Result<()> {
        let cur = self.entries.load();
        let mut next = (**cur).clone();
        next.push(addr);
        self.entries.store(Arc::new(next));
        Ok(())
    }

    pub fn remove(&self, _addr: Addr, _mask: u8) -> Result<()> {
        Err(ConfigError::Invalid("interface-address table does not support remove".into()))
    }

    pub fn lookup(&self, addr: &Addr) -> bool {
        self.entries.load().iter().any(|a| a == addr)
    }

    pub fn list(&self, mask: u8) -> Vec<(Addr, u8)> {
        self.entries.load().iter().map(|a| (*a, mask)).collect()
    }

    /// Atomically replaces the whole set, as on an interface reconfigure.
    pub fn replace(&self, addrs: Vec<Addr>) {
        self.entries.store(Arc::new(addrs));
    }

    pub fn flush(&self) {
        self.entries.store(Arc::new(Vec::new()));
    }
}
