//! IP-set table: exact-match hashmap, lock-free reads via `ArcSwap` over an
//! immutable map, serialized writers (§4.2).

use crate::addr::{table_cidr_check, Addr, NO_MASK};
use crate::error::{ConfigError, Result};
use ahash::AHashMap;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct IpSet {
    alen: u8,
    map: ArcSwap<AHashMap<Addr, ()>>,
    write_lock: Mutex<()>,
}

impl IpSet {
    pub fn new(alen: u8) -> Self {
        IpSet {
            alen,
            map: ArcSwap::from_pointee(AHashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Inserts a host address; the mask must be the "no mask" sentinel
    /// (full host) per §4.2's table, and fails on duplicate.
    pub fn insert(&self, addr: Addr, mask: u8) -> Result<()> {
        if mask != NO_MASK {
            return Err(ConfigError::Invalid("ip-set entries must be full host masks".into()));
        }
        let _guard = self.write_lock.lock();
        let cur = self.map.load();
        if cur.contains_key(&addr) {
            return Err(ConfigError::Exist(format!("{addr:?}")));
        }
        let mut next = (**cur).clone();
        next.insert(addr, ());
        self.map.store(Arc::new(next));
        Ok(())
    }

    pub fn remove(&self, addr: Addr, _mask: u8) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cur = self.map.load();
        if !cur.contains_key(&addr) {
            return Err(ConfigError::NotFound(format!("{addr:?}")));
        }
        let mut next = (**cur).clone();
        next.remove(&addr);
        self.map.store(Arc::new(next));
        Ok(())
    }

    /// Lock-free exact-match lookup against the current snapshot.
    pub fn lookup(&self, addr: &Addr) -> bool {
        self.map.load().contains_key(addr)
    }

    pub fn list(&self) -> Vec<(Addr, u8)> {
        self.map.load().keys().map(|a| (*a, NO_MASK)).collect()
    }

    pub fn flush(&self) {
        let _guard = self.write_lock.lock();
        self.map.store(Arc::new(AHashMap::new()));
    }

    pub fn check_mask(&self, mask: u8) -> bool {
        table_cidr_check(self.alen, mask)
    }
}
