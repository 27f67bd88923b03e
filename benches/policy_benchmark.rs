/*!
 * Scheduling Policy Benchmarks
 *
 * Cost of one pick and of the credit/debit calculation as the list grows
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gpuv_sched::world_switch::{
    ActiveList, DefaultPolicy, HybridLiquidPolicy, PolicyContext, SchedulePolicy, StopPolicy,
};
use gpuv_sched::FunctionId;

const CHARGE: StopPolicy = StopPolicy {
    record_histogram: true,
    forgive_overrun: false,
};

fn populated(n: u32) -> ActiveList {
    let mut list = ActiveList::new(0, 1000);
    for f in 0..n {
        if let Some(e) = list.entry_mut(f) {
            e.reset(6000 + f * 100, false, 0);
        }
        list.push_back(f);
    }
    list
}

fn bench_default_pick(c: &mut Criterion) {
    let mut group = c.benchmark_group("default_pick");

    for n in [1u32, 4, 16, 30] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut list = populated(n);
            b.iter(|| {
                let mut ctx = PolicyContext {
                    list: &mut list,
                    fairness: true,
                    pf_active: false,
                    status: 0,
                    skip_bound: 8,
                    single_fn_grant: 6000,
                };
                let pick = DefaultPolicy.pick(&mut ctx);
                if let Some(p) = pick {
                    list.move_to_tail(p.function);
                }
                black_box(pick)
            });
        });
    }

    group.finish();
}

fn bench_hybrid_liquid_pick(c: &mut Criterion) {
    let mut group = c.benchmark_group("hybrid_liquid_pick");

    // Only the last function is busy, so every pick walks the whole list
    for n in [4u32, 16, 30] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut list = populated(n);
            let busy = 1 << (n - 1);
            b.iter(|| {
                let mut ctx = PolicyContext {
                    list: &mut list,
                    fairness: false,
                    pf_active: false,
                    status: black_box(busy),
                    skip_bound: u32::MAX,
                    single_fn_grant: 6000,
                };
                black_box(HybridLiquidPolicy.pick(&mut ctx))
            });
        });
    }

    group.finish();
}

fn bench_residency_accounting(c: &mut Criterion) {
    c.bench_function("residency_accounting", |b| {
        let mut list = populated(8);
        let mut now = 1u64;
        let mut f: FunctionId = 0;
        b.iter(|| {
            let grant = list.calculate_time_slice(f, true, 6000);
            list.start_record(f, now);
            // Every third residency overruns by a millisecond
            let overrun = if f % 3 == 0 { 1000 } else { 0 };
            now += grant as u64 + overrun + 1;
            black_box(list.stop_record(f, now, CHARGE));
            f = (f + 1) % 8;
        });
    });
}

criterion_group!(
    benches,
    bench_default_pick,
    bench_hybrid_liquid_pick,
    bench_residency_accounting
);
criterion_main!(benches);
