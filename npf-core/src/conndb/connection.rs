//! The connection object (§3, §4.6): owns both keys, protocol state, an
//! optional NAT binding, and the bookkeeping the connection DB and G/C
//! worker need.

use crate::conndb::key::ConnectionKey;
use crate::decision::Decision;
use crate::nat::NatBinding;
use crate::state::ProtoState;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// `established`/`expired` flags; kept as a small bitset rather than
/// separate bools so a single relaxed load/store covers the common checks.
pub const FLAG_ESTABLISHED: u8 = 1 << 0;
pub const FLAG_EXPIRED: u8 = 1 << 1;

pub struct Connection {
    pub forw_key: ConnectionKey,
    pub back_key: ConnectionKey,
    pub state: Mutex<ProtoState>,
    pub nat: Mutex<Option<NatBinding>>,
    pub refcnt: AtomicU32,
    /// Epoch millis deadline; compared against `now_millis()`.
    pub expiry: AtomicU64,
    pub flags: AtomicU64,
    pub decision: Decision,
    pub in_interface: u16,
}

impl Connection {
    pub fn new(
        forw_key: ConnectionKey,
        back_key: ConnectionKey,
        proto: u8,
        decision: Decision,
        in_interface: u16,
    ) -> Self {
        let now = now_millis();
        Connection {
            forw_key,
            back_key,
            state: Mutex::new(ProtoState::new_for_proto(proto)),
            nat: Mutex::new(None),
            refcnt: AtomicU32::new(1),
            expiry: AtomicU64::new(now + 30_000),
            flags: AtomicU64::new(0),
            decision,
            in_interface,
        }
    }

    pub fn hold(&self) {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases a hold; returns `true` if this was the last one.
    pub fn release(&self) -> bool {
        self.refcnt.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Acquire)
    }

    pub fn is_expired(&self) -> bool {
        now_millis() >= self.expiry.load(Ordering::Acquire)
    }

    pub fn set_expiry_in(&self, dur: std::time::Duration) {
        self.expiry
            .store(now_millis() + dur.as_millis() as u64, Ordering::Release);
    }

    pub fn expire_now(&self) {
        self.expiry.store(0, Ordering::Release);
        self.flags.fetch_or(FLAG_EXPIRED as u64, Ordering::AcqRel);
    }

    pub fn is_marked_expired(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_EXPIRED as u64 != 0
    }

    pub fn mark_established(&self) {
        self.flags
            .fetch_or(FLAG_ESTABLISHED as u64, Ordering::AcqRel);
    }

    /// Runs one packet through the per-connection state lock (§5 "all
    /// updates serialized by a small per-connection state lock"). `forward`
    /// is true when the packet matched the connection's forward key.
    pub fn inspect(&self, npc: &crate::npc::Npc, forward: bool) -> bool {
        let mut st = self.state.lock();
        let accepted = st.inspect(npc, forward);
        if accepted {
            self.set_expiry_in(st.timeout());
            if st.is_established() {
                self.mark_established();
            }
        }
        accepted
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Addr;

    fn key() -> (ConnectionKey, ConnectionKey) {
        let a = Addr::from_ipv4("192.0.2.1".parse().unwrap());
        let b = Addr::from_ipv4("198.51.100.1".parse().unwrap());
        ConnectionKey::pair(6, 4, a, b, 1024, 80)
    }

    #[test]
    fn refcnt_tracks_holds_and_releases() {
        let (f, b) = key();
        let conn = Connection::new(f, b, 6, Decision::Pass, 1);
        assert_eq!(conn.refcnt(), 1);
        conn.hold();
        assert_eq!(conn.refcnt(), 2);
        assert!(!conn.release());
        assert!(conn.release());
    }

    #[test]
    fn expire_now_marks_and_zeroes_deadline() {
        let (f, b) = key();
        let conn = Connection::new(f, b, 17, Decision::Pass, 1);
        assert!(!conn.is_expired());
        conn.expire_now();
        assert!(conn.is_expired());
        assert!(conn.is_marked_expired());
    }
}
