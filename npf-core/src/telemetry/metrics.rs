//! Prometheus metrics, grounded on the teacher's
//! `telemetry::metrics::init_metrics`: an `opentelemetry` meter backed by
//! `opentelemetry_prometheus`, exporting the §6 counters as observable
//! gauges sampled from the running [`crate::stats::Stats`] aggregate.

use crate::stats::StatsSnapshot;
use opentelemetry::metrics::Meter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

/// Holds no state of its own beyond the registered callback; the
/// observable counters are sampled on export, not pushed on every packet.
#[derive(Clone)]
pub struct Metrics {
    _meter: Meter,
}

/// Registers the §6 counters against `meter`, sampling `snapshot_fn` each
/// time Prometheus scrapes `/metrics`.
fn register(meter: &Meter, snapshot_fn: Arc<dyn Fn() -> StatsSnapshot + Send + Sync>) {
    let f1 = snapshot_fn.clone();
    meter
        .u64_observable_counter("npf_packets_passed_total")
        .with_description("Total packets passed by the ruleset")
        .with_callback(move |observer| observer.observe(f1().packets_passed, &[]))
        .build();

    let f2 = snapshot_fn.clone();
    meter
        .u64_observable_counter("npf_packets_blocked_total")
        .with_description("Total packets blocked by the ruleset")
        .with_callback(move |observer| observer.observe(f2().packets_blocked, &[]))
        .build();

    let f3 = snapshot_fn.clone();
    meter
        .u64_observable_counter("npf_connections_created_total")
        .with_description("Total connections created in the connection state database")
        .with_callback(move |observer| observer.observe(f3().connections_created, &[]))
        .build();

    let f4 = snapshot_fn.clone();
    meter
        .u64_observable_counter("npf_connections_destroyed_total")
        .with_description("Total connections reaped by garbage collection")
        .with_callback(move |observer| observer.observe(f4().connections_destroyed, &[]))
        .build();

    let f5 = snapshot_fn.clone();
    meter
        .u64_observable_counter("npf_nat_alloc_failures_total")
        .with_description("Total NAT binding allocation failures")
        .with_callback(move |observer| observer.observe(f5().nat_alloc_failures, &[]))
        .build();

    let f6 = snapshot_fn.clone();
    meter
        .u64_observable_counter("npf_portmap_exhausted_total")
        .with_description("Total port allocation attempts that found the portmap exhausted")
        .with_callback(move |observer| observer.observe(f6().portmap_exhausted, &[]))
        .build();

    meter
        .u64_observable_counter("npf_state_rejects_total")
        .with_description("Total packets rejected by a per-protocol state machine")
        .with_callback(move |observer| observer.observe(snapshot_fn().state_rejects, &[]))
        .build();
}

/// Builds the Prometheus registry and installs the global meter provider,
/// mirroring the teacher's `init_metrics` shape.
pub fn init_metrics(
    snapshot_fn: impl Fn() -> StatsSnapshot + Send + Sync + 'static,
) -> Result<(Metrics, Registry), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter().with_registry(registry.clone()).build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();
    opentelemetry::global::set_meter_provider(meter_provider);

    let meter = opentelemetry::global::meter("npf");
    register(&meter, Arc::new(snapshot_fn));

    Ok((Metrics { _meter: meter }, registry))
}
