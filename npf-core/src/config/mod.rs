//! Configuration (ambient stack addition, see `SPEC_FULL.md` §1): a
//! `serde`-deserialized `Config` loaded from TOML, validated into the
//! named error codes of §7, and hot-reloadable via `notify` +
//! `arc_swap::ArcSwap`, the way the teacher's TLS cert reloader swaps
//! `ServerCryptoBase` — applied here to an entire compiled [`Ruleset`].

pub mod params;
pub mod watcher;

pub use params::{ParamSpec, Params};
pub use watcher::ConfigWatcher;

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::path::Path;

fn default_gc_interval_secs() -> u64 {
    5
}

fn default_gc_step_bound() -> usize {
    512
}

fn default_conndb_shards() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_generic_new")]
    pub generic_new: u64,
    #[serde(default = "default_generic_established")]
    pub generic_established: u64,
    #[serde(default = "default_tcp_established")]
    pub tcp_established: u64,
    #[serde(default = "default_gre_established")]
    pub gre_established: u64,
}

fn default_generic_new() -> u64 {
    30
}
fn default_generic_established() -> u64 {
    60
}
fn default_tcp_established() -> u64 {
    24 * 3600
}
fn default_gre_established() -> u64 {
    24 * 3600
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            generic_new: default_generic_new(),
            generic_established: default_generic_established(),
            tcp_established: default_tcp_established(),
            gre_established: default_gre_established(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Ip4Config {
    #[serde(default)]
    pub reassembly: bool,
    #[serde(default)]
    pub drop_options: bool,
}

impl Default for Ip4Config {
    fn default() -> Self {
        Ip4Config { reassembly: false, drop_options: false }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub ip4: Ip4Config,
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    #[serde(default = "default_gc_step_bound")]
    pub gc_step_bound: usize,
    #[serde(default = "default_conndb_shards")]
    pub conndb_shards: usize,
    #[serde(default)]
    pub pptp_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timeouts: TimeoutConfig::default(),
            ip4: Ip4Config::default(),
            gc_interval_secs: default_gc_interval_secs(),
            gc_step_bound: default_gc_step_bound(),
            conndb_shards: default_conndb_shards(),
            pptp_enabled: true,
        }
    }
}

impl Config {
    /// Turns structural mistakes into the named error codes of §7
    /// (`EINVAL`): zero-length G/C intervals or conndb shard counts would
    /// make the worker (§4.11) or connection DB (§4.6) non-functional.
    pub fn validate(&self) -> Result<()> {
        if self.gc_interval_secs == 0 {
            return Err(ConfigError::Invalid("gc_interval_secs must be non-zero".into()));
        }
        if self.gc_step_bound == 0 {
            return Err(ConfigError::Invalid("gc_step_bound must be non-zero".into()));
        }
        if self.conndb_shards == 0 || !self.conndb_shards.is_power_of_two() {
            return Err(ConfigError::Invalid(
                "conndb_shards must be a non-zero power of two".into(),
            ));
        }
        Ok(())
    }
}

/// Parses and validates a TOML config file, mirroring the teacher's
/// `config::load_from_path`.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let text = std::fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}
