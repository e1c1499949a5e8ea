//! The connection database (§4.6): a sharded concurrent map from
//! [`ConnectionKey`] to [`Connection`], with epoch-based reclamation and a
//! worker-driven G/C pass.

pub mod connection;
pub mod ebr;
pub mod gc;
pub mod key;

pub use connection::Connection;
pub use ebr::{Ebr, WorkerHandle};
pub use key::ConnectionKey;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const DEFAULT_SHARDS: usize = 16;

pub struct ConnDb {
    shards: Vec<RwLock<AHashMap<ConnectionKey, Arc<Connection>>>>,
    /// Incoming connections, appended by `enqueue`; transferred to `stable`
    /// by the G/C worker before each scan (§4.6).
    recent: Mutex<Vec<Arc<Connection>>>,
    stable: Mutex<Vec<Arc<Connection>>>,
    /// Unlinked but not yet freed: refcount must drain and EBR must clear
    /// before these are dropped.
    deferred: Mutex<Vec<(Arc<Connection>, u64)>>,
    pub ebr: Ebr,
}

impl Default for ConnDb {
    fn default() -> Self {
        ConnDb::new(DEFAULT_SHARDS)
    }
}

impl ConnDb {
    pub fn new(nshards: usize) -> Self {
        let mut shards = Vec::with_capacity(nshards);
        for _ in 0..nshards {
            shards.push(RwLock::new(AHashMap::new()));
        }
        ConnDb {
            shards,
            recent: Mutex::new(Vec::new()),
            stable: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            ebr: Ebr::new(),
        }
    }

    fn shard_for(&self, key: &ConnectionKey) -> &RwLock<AHashMap<ConnectionKey, Arc<Connection>>> {
        let mut hasher = ahash::AHasher::default();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Indexes a connection under both its forward and backward keys.
    /// Fails (and inserts neither) if either key is already present.
    pub fn insert(&self, conn: Arc<Connection>) -> bool {
        let fshard = self.shard_for(&conn.forw_key);
        let bshard = self.shard_for(&conn.back_key);

        // Distinct shards lock independently; same-shard case relies on
        // re-entrant-free ordering (lock once) to avoid a self-deadlock.
        if std::ptr::eq(fshard, bshard) {
            let mut g = fshard.write();
            if g.contains_key(&conn.forw_key) || g.contains_key(&conn.back_key) {
                return false;
            }
            g.insert(conn.forw_key, conn.clone());
            g.insert(conn.back_key, conn);
        } else {
            let mut fg = fshard.write();
            let mut bg = bshard.write();
            if fg.contains_key(&conn.forw_key) || bg.contains_key(&conn.back_key) {
                return false;
            }
            fg.insert(conn.forw_key, conn.clone());
            bg.insert(conn.back_key, conn);
        }
        true
    }

    /// `lookup(key) -> (connection, is_forward)` (§4.6): on hit, increments
    /// the connection's refcount and reports which key matched.
    pub fn lookup(&self, key: &ConnectionKey) -> Option<(Arc<Connection>, bool)> {
        let shard = self.shard_for(key);
        let g = shard.read();
        let conn = g.get(key)?;
        conn.hold();
        let forward = conn.forw_key == *key;
        Some((conn.clone(), forward))
    }

    /// Unlinks both keys; the caller owns the returned connection and must
    /// not destroy it until `refcnt == 0` and EBR has drained (§4.6).
    pub fn remove(&self, key: &ConnectionKey) -> Option<Arc<Connection>> {
        let fshard = self.shard_for(key);
        let conn = {
            let mut g = fshard.write();
            g.remove(key)
        }?;
        let other_key = if conn.forw_key == *key {
            conn.back_key
        } else {
            conn.forw_key
        };
        let oshard = self.shard_for(&other_key);
        oshard.write().remove(&other_key);

        // The map itself held one reference; releasing it here means a
        // connection with no other holds reaches refcnt==0 as soon as
        // it's unlinked, per §4.6's "refcnt >= 1 while present in the DB".
        conn.release();

        let epoch = self.ebr.current_epoch();
        self.deferred.lock().push((conn.clone(), epoch));
        Some(conn)
    }

    /// Appends to the recent list so the next G/C tick picks it up.
    pub fn enqueue(&self, conn: Arc<Connection>) {
        self.recent.lock().push(conn);
    }

    pub fn stable_len(&self) -> usize {
        self.stable.lock().len()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }

    pub(crate) fn transfer_recent_to_stable(&self) {
        let mut recent = self.recent.lock();
        if recent.is_empty() {
            return;
        }
        self.stable.lock().append(&mut recent);
    }

    pub(crate) fn stable_snapshot(&self, limit: usize) -> Vec<Arc<Connection>> {
        let stable = self.stable.lock();
        stable.iter().take(limit).cloned().collect()
    }

    pub(crate) fn drop_expired_from_stable(&self, expired_ptrs: &[*const Connection]) {
        let mut stable = self.stable.lock();
        stable.retain(|c| !expired_ptrs.contains(&(Arc::as_ptr(c))));
    }

    pub(crate) fn take_deferred(&self) -> Vec<(Arc<Connection>, u64)> {
        std::mem::take(&mut *self.deferred.lock())
    }

    pub(crate) fn push_back_deferred(&self, items: Vec<(Arc<Connection>, u64)>) {
        self.deferred.lock().extend(items);
    }
}
