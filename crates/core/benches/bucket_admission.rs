use std::sync::Arc;
use std::time::Duration;

use conduit_common::resilience::SystemClock;
use conduit_core::BucketStore;
use conduit_domain::{RateLimitHeaders, RouteKey};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn headers(bucket: &str) -> RateLimitHeaders {
    RateLimitHeaders {
        limit: Some(1_000_000),
        remaining: Some(1_000_000),
        reset_after: Some(Duration::from_secs(3_600)),
        bucket: Some(bucket.to_string()),
        ..RateLimitHeaders::default()
    }
}

fn routes(count: usize) -> Vec<RouteKey> {
    (0..count)
        .map(|idx| {
            RouteKey::with_major("POST /channels/{channel_id}/messages", idx.to_string().as_str())
        })
        .collect()
}

fn admission_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_admission");
    group.sample_size(20).measurement_time(Duration::from_secs(10));

    group.bench_function("reserve_single_route", |b| {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let store = Arc::new(BucketStore::with_clock(SystemClock, None));
        let route = RouteKey::with_major("GET /channels/{channel_id}", "1");
        runtime.block_on(store.update(&route, &headers("single")));

        b.iter(|| {
            let wait = runtime.block_on(store.reserve(&route)).expect("reserve");
            black_box(wait);
        });
    });

    group.bench_function("reserve_update_64_routes_concurrently", |b| {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let store = Arc::new(BucketStore::with_clock(SystemClock, None));
        let routes = routes(64);
        runtime.block_on(async {
            for (idx, route) in routes.iter().enumerate() {
                store.update(route, &headers(&format!("bucket-{idx}"))).await;
            }
        });

        b.iter(|| {
            runtime.block_on(async {
                let tasks: Vec<_> = routes
                    .iter()
                    .cloned()
                    .map(|route| {
                        let store = Arc::clone(&store);
                        tokio::spawn(async move {
                            let wait = store.reserve(&route).await.expect("reserve");
                            store.update(&route, &headers("shared")).await;
                            black_box(wait);
                        })
                    })
                    .collect();
                for task in tasks {
                    task.await.expect("join");
                }
            });
        });
    });

    group.finish();
}

criterion_group!(core_benchmarks, admission_benchmark);
criterion_main!(core_benchmarks);
