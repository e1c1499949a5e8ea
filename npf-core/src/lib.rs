#![forbid(unsafe_code)]
//! Stateful packet-filter firewall dataplane: classification, connection
//! tracking with epoch-based reclamation, NAT, the PPTP ALG, and the
//! rule-procedure framework, plus the ambient config/telemetry stack
//! around them. See `SPEC_FULL.md` at the workspace root for the full
//! module map and invariants.

pub mod addr;
pub mod alg;
pub mod bpf;
pub mod config;
pub mod conndb;
pub mod decision;
pub mod error;
pub mod iface;
pub mod nat;
pub mod npc;
pub mod pipeline;
pub mod proto;
pub mod rproc;
pub mod ruleset;
pub mod state;
pub mod stats;
pub mod system;
pub mod table;
pub mod telemetry;
pub mod worker;

pub use error::{ConfigError, Result};
pub use system::System;
