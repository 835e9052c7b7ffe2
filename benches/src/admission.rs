use choke_lib::{
    CapacityPolicy, Decision, GateBuilder, GraceMode, LedgerIdentity, LedgerRecord, Registry,
    Timestamp, decide, release_slot,
};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(
        "metered.example.com",
        CapacityPolicy::new(100, 30, 10, 1800).unwrap(),
    );
    registry.register("open.example.com", CapacityPolicy::unlimited());
    registry
}

fn benchmark_decide(c: &mut Criterion) {
    let policy = CapacityPolicy::new(10, 15, 10, 1800).unwrap();
    let now = Timestamp::from_secs(1_700_000_000);
    let below = LedgerRecord::default();
    let burst = LedgerRecord {
        in_use_slots: 10,
        grace_expires_at: Some(now.saturating_add(std::time::Duration::from_secs(5))),
    };

    c.bench_function("decide below limit", |b| {
        b.iter(|| decide(black_box(&policy), black_box(&below), now, GraceMode::Persistent))
    });
    c.bench_function("decide in burst band", |b| {
        b.iter(|| decide(black_box(&policy), black_box(&burst), now, GraceMode::Persistent))
    });
}

fn benchmark_gate(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let gate = GateBuilder::builder()
        .registry(registry())
        .identity(LedgerIdentity::in_dir(dir.path(), std::process::id()))
        .build()
        .create()
        .unwrap();
    let metered = gate.registry().lookup("metered.example.com").unwrap();
    let open = gate.registry().lookup("open.example.com").unwrap();

    c.bench_function("admit and release (metered)", |b| {
        b.iter(|| {
            let decision = gate.try_admit(black_box(metered)).unwrap();
            assert_eq!(decision, Decision::Admit);
            gate.release(metered).unwrap();
        })
    });
    c.bench_function("admit and release (unlimited)", |b| {
        b.iter(|| {
            let decision = gate.try_admit(black_box(open)).unwrap();
            assert_eq!(decision, Decision::Admit);
            gate.release(open).unwrap();
        })
    });
    c.bench_function("slot permit", |b| {
        b.iter(|| drop(gate.admit(black_box(metered)).unwrap()))
    });
    c.bench_function("release_slot", |b| {
        b.iter(|| release_slot(black_box(&LedgerRecord::default())))
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = benchmark_decide, benchmark_gate
);
criterion_main!(benches);
