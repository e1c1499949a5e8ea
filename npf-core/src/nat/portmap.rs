//! Per-external-address port/id allocator, CAS-based over 32-bit bitmap
//! words (§3, §5 "Portmap: multi-writer lock-free").

use crate::addr::Addr;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Bitmap allocator over `[lo..=hi]` for one external address.
pub struct AddrPortmap {
    lo: u16,
    hi: u16,
    words: Vec<AtomicU32>,
}

impl AddrPortmap {
    fn new(lo: u16, hi: u16) -> Self {
        let span = hi as u32 - lo as u32 + 1;
        let nwords = span.div_ceil(32) as usize;
        let words = (0..nwords).map(|_| AtomicU32::new(0)).collect();
        AddrPortmap { lo, hi, words }
    }

    fn index_of(&self, port: u16) -> Option<(usize, u32)> {
        if port < self.lo || port > self.hi {
            return None;
        }
        let bit = (port - self.lo) as u32;
        Some((bit as usize / 32, 1u32 << (bit % 32)))
    }

    /// Finds and claims the first free port via a bounded CAS retry loop
    /// per word; returns `None` when the range is exhausted.
    pub fn allocate(&self) -> Option<u16> {
        for (wi, word) in self.words.iter().enumerate() {
            loop {
                let cur = word.load(Ordering::Acquire);
                if cur == u32::MAX {
                    break;
                }
                let free_bit = (!cur).trailing_zeros();
                let mask = 1u32 << free_bit;
                match word.compare_exchange_weak(
                    cur,
                    cur | mask,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        let port = self.lo as u32 + (wi as u32 * 32 + free_bit);
                        if port <= self.hi as u32 {
                            return Some(port as u16);
                        } else {
                            // Clear a spurious bit past the end of the range
                            // and keep looking in this word.
                            word.fetch_and(!mask, Ordering::AcqRel);
                            break;
                        }
                    }
                    Err(_) => continue,
                }
            }
        }
        None
    }

    /// Claims a specific port, failing if already in use.
    pub fn allocate_specific(&self, port: u16) -> bool {
        let Some((wi, mask)) = self.index_of(port) else {
            return false;
        };
        let prev = self.words[wi].fetch_or(mask, Ordering::AcqRel);
        prev & mask == 0
    }

    pub fn release(&self, port: u16) {
        if let Some((wi, mask)) = self.index_of(port) {
            self.words[wi].fetch_and(!mask, Ordering::AcqRel);
        }
    }

    pub fn in_use_count(&self) -> u32 {
        self.words.iter().map(|w| w.load(Ordering::Acquire).count_ones()).sum()
    }
}

/// Top-level portmap: one [`AddrPortmap`] per (address, alen), created
/// lazily and shared between NAT and the PPTP ALG's call-id allocation.
pub struct Portmap {
    lo: u16,
    hi: u16,
    per_addr: RwLock<HashMap<(Addr, u8), Arc<AddrPortmap>>>,
}

impl Portmap {
    pub fn new(lo: u16, hi: u16) -> Self {
        Portmap {
            lo,
            hi,
            per_addr: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_create(&self, addr: Addr, alen: u8) -> Arc<AddrPortmap> {
        if let Some(pm) = self.per_addr.read().get(&(addr, alen)) {
            return pm.clone();
        }
        let mut guard = self.per_addr.write();
        guard
            .entry((addr, alen))
            .or_insert_with(|| Arc::new(AddrPortmap::new(self.lo, self.hi)))
            .clone()
    }

    pub fn allocate(&self, addr: Addr, alen: u8) -> Option<u16> {
        self.get_or_create(addr, alen).allocate()
    }

    pub fn allocate_specific(&self, addr: Addr, alen: u8, port: u16) -> bool {
        self.get_or_create(addr, alen).allocate_specific(port)
    }

    pub fn release(&self, addr: Addr, alen: u8, port: u16) {
        if let Some(pm) = self.per_addr.read().get(&(addr, alen)) {
            pm.release(port);
        }
    }

    pub fn in_use_count(&self, addr: Addr, alen: u8) -> u32 {
        self.per_addr
            .read()
            .get(&(addr, alen))
            .map(|pm| pm.in_use_count())
            .unwrap_or(0)
    }
}
