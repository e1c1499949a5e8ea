//! The system instance (§3 "System/Instance"): owns every shared
//! collaborator a packet-processing `Pipeline` borrows from, plus the
//! background worker that drives the connection-DB G/C tick (§4.11). This
//! is the construction root the `npf` binary and the end-to-end tests
//! build against instead of wiring each piece by hand.

use crate::alg::AlgRegistry;
use crate::config::Config;
use crate::conndb::gc::run_gc_tick;
use crate::conndb::ConnDb;
use crate::rproc::ExtensionRegistry;
use crate::ruleset::{DynamicRulesets, Ruleset};
use crate::stats::Stats;
use crate::table::TableRegistry;
use crate::worker::Worker;
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Bundles the shared, cross-worker state: the connection database, table
/// registry, ALG and rule-procedure registries, the live ruleset (plus any
/// named dynamic rulesets), aggregate stats, and the background G/C
/// worker. A `Pipeline` (§4.10) borrows from this for the lifetime of one
/// packet; nothing here is dataplane-worker-local.
pub struct System {
    pub conndb: ConnDb,
    pub tables: RwLock<TableRegistry>,
    pub algs: AlgRegistry,
    pub extensions: RwLock<ExtensionRegistry>,
    pub ruleset: ArcSwap<Ruleset>,
    pub dynamic_rulesets: RwLock<DynamicRulesets>,
    pub stats: Stats,
    gc_worker: Worker,
}

impl System {
    /// Builds a system from a validated [`Config`]: sizes the connection
    /// DB's shard count from `config.conndb_shards`, enables the PPTP ALG
    /// per `config.pptp_enabled`, and starts the G/C worker on
    /// `config.gc_interval_secs` immediately.
    pub fn new(config: &Config) -> Arc<Self> {
        let system = Arc::new(System {
            conndb: ConnDb::new(config.conndb_shards),
            tables: RwLock::new(TableRegistry::new()),
            algs: AlgRegistry::with_pptp(config.pptp_enabled),
            extensions: RwLock::new(ExtensionRegistry::new()),
            ruleset: ArcSwap::from_pointee(Ruleset::default()),
            dynamic_rulesets: RwLock::new(DynamicRulesets::new()),
            stats: Stats::new(),
            gc_worker: Worker::spawn(Duration::from_secs(config.gc_interval_secs)),
        });

        let step_bound = config.gc_step_bound.max(1);
        let gc_system = system.clone();
        system.gc_worker.register(move || {
            let gc_stats = run_gc_tick(&gc_system.conndb, &gc_system.algs, step_bound, false, true);
            for _ in 0..gc_stats.destroyed {
                gc_system.stats.record_connection_destroyed();
            }
        });

        system
    }

    /// Convenience constructor for tests and tooling that don't need a
    /// loaded [`Config`]; uses every default.
    pub fn with_defaults() -> Arc<Self> {
        System::new(&Config::default())
    }

    /// Installs a new top-level ruleset, replacing whatever was live.
    pub fn swap_ruleset(&self, ruleset: Ruleset) {
        self.ruleset.store(Arc::new(ruleset));
    }
}
