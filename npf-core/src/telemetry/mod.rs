//! Observability (ambient stack, see `SPEC_FULL.md` §6): structured
//! logging via `tracing`/`tracing-subscriber` and a Prometheus registry
//! via `opentelemetry`/`opentelemetry-prometheus`, grounded on the
//! teacher's `telemetry` module. This crate stops at building the
//! `Registry`: serving it over `/metrics` needs an async runtime to
//! accept connections, and this crate is the synchronous dataplane core
//! (§4.10, §5 "dataplane workers must not sleep") — the `npf` binary,
//! which already runs a tokio runtime for its own signal handling, owns
//! the `hyper` server that exposes this registry (see
//! `npf/src/metrics_server.rs`).

pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, Metrics};
pub use tracing::{init_tracing, shutdown_tracing};
