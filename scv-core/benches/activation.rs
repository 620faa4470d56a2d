use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use scv_core::{LoggingInjector, Manager, Stream, StreamId, TargetId};
use tokio::runtime::Runtime;

fn seeded_manager(rt: &Runtime, stream_count: usize) -> (Manager, TargetId) {
    let manager = Manager::new(Arc::new(LoggingInjector), Duration::from_secs(20 * 60));
    let target = TargetId::new("bench-target");
    rt.block_on(async {
        for i in 0..stream_count {
            manager
                .add_stream(Stream::new(
                    StreamId::new(format!("s{i}")),
                    target.clone(),
                    "bench-owner",
                ))
                .await
                .unwrap();
        }
    });
    (manager, target)
}

fn activate_deactivate_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (manager, target) = seeded_manager(&rt, 10_000);

    c.bench_function("activate_then_deactivate", |b| {
        b.to_async(&rt).iter_batched(
            || (),
            |()| {
                let manager = manager.clone();
                let target = target.clone();
                async move {
                    let (token, _) = manager.activate_stream(&target, "alice", "engA").await.unwrap();
                    manager.deactivate_stream(&token).await.unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, activate_deactivate_roundtrip);
criterion_main!(benches);
