use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tokio::runtime::Runtime;
use voxhold::{ConfigFingerprint, MockBackend, RecognizerManager, RetentionPolicy};

fn fingerprint() -> ConfigFingerprint {
    ConfigFingerprint::new("mock")
        .with_model_file("model", "/models/bench.bin")
        .with_threads(2)
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
}

/// Warm create/release cycle: the model stays loaded throughout.
fn bench_stream_cycle(c: &mut Criterion) {
    let rt = runtime();
    let manager = RecognizerManager::new(MockBackend::new("mock"));
    rt.block_on(manager.prepare(fingerprint(), RetentionPolicy::keep_forever()));

    c.bench_function("create_release_stream", |b| {
        b.to_async(&rt).iter(|| async {
            let stream = manager.create_stream().await;
            manager.release_stream(black_box(stream)).await;
        })
    });
}

/// Repeated prepare of the loaded fingerprint.
fn bench_prepare_reuse(c: &mut Criterion) {
    let rt = runtime();
    let manager = RecognizerManager::new(MockBackend::new("mock"));
    rt.block_on(manager.prepare(fingerprint(), RetentionPolicy::keep_forever()));

    c.bench_function("prepare_reuse", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                manager
                    .prepare(fingerprint(), RetentionPolicy::keep_forever())
                    .await,
            )
        })
    });
}

/// Feeding and decoding 100ms chunks through the native lock.
fn bench_stream_forwarding(c: &mut Criterion) {
    let rt = runtime();
    let manager = RecognizerManager::new(MockBackend::new("mock"));
    rt.block_on(manager.prepare(fingerprint(), RetentionPolicy::keep_forever()));
    let Some(stream) = rt.block_on(manager.create_stream()) else {
        eprintln!("Skipping forwarding bench: no stream");
        return;
    };
    let chunk = vec![0.1_f32; 1600];

    c.bench_function("accept_decode_result", |b| {
        b.iter(|| {
            manager.accept_waveform(&stream, black_box(&chunk), 16000);
            if manager.is_ready(&stream) {
                manager.decode(&stream);
            }
            black_box(manager.result_text(&stream))
        })
    });

    rt.block_on(manager.release_stream(stream));
}

criterion_group!(
    benches,
    bench_stream_cycle,
    bench_prepare_reuse,
    bench_stream_forwarding
);
criterion_main!(benches);
