//! Micro benchmark for the CAR token-bucket rule procedure (§4.9). Pure
//! CPU - no network, no IO.
//!
//! ```bash
//! cargo bench --bench bench_ratelimit
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use npf_core::rproc::{CarConfig, RateLimitProc};

fn bench_admit_steady_state(c: &mut Criterion) {
    let car = RateLimitProc::new(CarConfig::new(1_000_000_000));
    let mut now = 0u64;

    c.bench_function("car_admit_steady_state_1500b", |b| {
        b.iter(|| {
            now += 1;
            car.admit(std::hint::black_box(1500), now)
        });
    });
}

fn bench_admit_under_sustained_overload(c: &mut Criterion) {
    let car = RateLimitProc::new(CarConfig::with_bursts(8000, 1500, 3000));

    c.bench_function("car_admit_sustained_overload_200b", |b| {
        b.iter(|| car.admit(std::hint::black_box(200), 0));
    });
}

criterion_group!(ratelimit_benches, bench_admit_steady_state, bench_admit_under_sustained_overload);
criterion_main!(ratelimit_benches);
