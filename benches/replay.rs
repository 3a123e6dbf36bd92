mod common;

use common::workload::{TraceSpec, Workload};
use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use evictsim::builder::{PolicyBuilder, PolicyKind};
use evictsim::config::SimulatorSettings;
use evictsim::event::AccessEvent;
use evictsim::policy::gdsf::GdsfVariant;
use evictsim::policy::sampled_tinylfu::SampledSelection;
use evictsim::policy::window_tinylfu::VictimSelection;
use evictsim::simulator::{Simulator, replay};

const TRACE_LEN: usize = 100_000;

fn trace() -> Vec<AccessEvent> {
    TraceSpec {
        universe: 20_000,
        workload: Workload::Zipfian { theta: 0.99 },
        max_weight: 64,
        seed: 42,
    }
    .generate(TRACE_LEN)
}

fn builder() -> PolicyBuilder {
    PolicyBuilder::new(SimulatorSettings {
        maximum_size: 100_000,
        multilevel_maximum_size: vec![25_000, 100_000],
        ..Default::default()
    })
}

fn bench_replay_per_policy(c: &mut Criterion) {
    let trace = trace();
    let builder = builder();
    let kinds = [
        PolicyKind::WindowTinyLfu(VictimSelection::Single),
        PolicyKind::WindowTinyLfu(VictimSelection::Sum),
        PolicyKind::HillClimberWindowTinyLfu(VictimSelection::Single),
        PolicyKind::SampledTinyLfu(SampledSelection::Single),
        PolicyKind::Gdsf(GdsfVariant::Gdsf),
        PolicyKind::Multilevel,
        PolicyKind::Promote,
        PolicyKind::BidiTinyLfu,
    ];

    let mut group = c.benchmark_group("replay");
    group.throughput(Throughput::Elements(TRACE_LEN as u64));
    group.sample_size(10);
    for kind in kinds {
        let name = format!("{kind:?}");
        group.bench_function(name, |b| {
            b.iter_batched(
                || builder.build(kind).unwrap().remove(0),
                |mut policy| {
                    let report = replay(policy.as_mut(), &trace).unwrap();
                    std::hint::black_box(report.snapshot.hit_rate)
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_parallel_simulation(c: &mut Criterion) {
    let trace = trace();
    let builder = builder();

    let mut group = c.benchmark_group("simulation");
    group.sample_size(10);
    group.bench_function("all_policies_parallel", |b| {
        b.iter_batched(
            || Simulator::from_builder(&builder, &PolicyKind::all()).unwrap(),
            |simulator| std::hint::black_box(simulator.run(&trace).unwrap().len()),
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_replay_per_policy, bench_parallel_simulation);
criterion_main!(benches);
