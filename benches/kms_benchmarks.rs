use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use keyseal::prelude::*;

fn bench_manager() -> KeyLifecycleManager<SoftDevice> {
    let config = ManagerConfig {
        startup: StartupPolicy::Preserve,
        ..ManagerConfig::default()
    };
    KeyLifecycleManager::new(
        SoftDevice::new(),
        config,
        Arc::new(FixedClock::new(1_750_000_000)),
        Arc::new(LogFacade),
    )
    .unwrap()
}

fn device_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("soft_device");
    let device = SoftDevice::new();

    group.bench_function("generate_symmetric_key", |b| {
        b.iter(|| device.generate_symmetric_key())
    });

    // Benchmark seal and unseal across payload sizes
    for size in [16usize, 32, 64, 128].iter() {
        let key = PlaintextKey::from(vec![0xA5u8; *size]);
        group.bench_with_input(BenchmarkId::new("seal", size), size, |b, _| {
            b.iter(|| device.seal(&key))
        });

        let sealed = device.seal(&key).unwrap();
        group.bench_with_input(BenchmarkId::new("unseal", size), size, |b, _| {
            b.iter(|| device.unseal(&sealed))
        });
    }

    group.bench_function("hash_1k", |b| {
        let data = vec![0u8; 1024];
        b.iter(|| device.hash(&data))
    });

    group.finish();
}

fn manager_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle");

    let manager = bench_manager();
    group.bench_function("generate_key", |b| b.iter(|| manager.generate_key()));

    let key_id = KeyId::new("bench").unwrap();
    manager
        .store_key(key_id.clone(), PlaintextKey::from_slice(&[1u8; 32]))
        .unwrap();
    group.bench_function("fetch_key", |b| b.iter(|| manager.fetch_key(&key_id)));

    // Rotation over a populated store
    for count in [10usize, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("rotate_keys", count), count, |b, &count| {
            b.iter_batched(
                || {
                    let manager = bench_manager();
                    for i in 0..count {
                        manager
                            .store_key(
                                KeyId::from_timestamp(1_700_000_000 + i as i64),
                                PlaintextKey::from_slice(&[2u8; 32]),
                            )
                            .unwrap();
                    }
                    manager
                },
                |manager| manager.rotate_keys(),
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn request_benchmarks(c: &mut Criterion) {
    let handler = RequestHandler::new(Arc::new(bench_manager()), Arc::new(LogFacade));
    let key_id = handler.manager().create_key().unwrap();
    let path = format!("/fetch-key/{}", key_id);

    c.bench_function("handle_route_fetch", |b| {
        b.iter(|| handler.handle_route("GET", &path, b""))
    });
}

criterion_group!(
    benches,
    device_benchmarks,
    manager_benchmarks,
    request_benchmarks
);
criterion_main!(benches);
