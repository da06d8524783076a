//! Benchmarks for the pure hot paths: key naming, codec round-trips, and
//! local-tier operations. No Redis required.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use hybrid_redis_cache::local_tier::LocalTier;
use hybrid_redis_cache::{CacheCodec, JsonCodec, KeyNamer};
use std::time::Duration;
use tokio::runtime::Runtime;

fn bench_key_naming(c: &mut Criterion) {
    let namer = KeyNamer::new("app");

    c.bench_function("key_namer/name", |b| {
        b.iter(|| namer.name(black_box("user:12345")));
    });

    c.bench_function("key_namer/pattern", |b| {
        b.iter(|| namer.pattern(black_box("user:")));
    });
}

fn bench_codec(c: &mut Criterion) {
    let codec = JsonCodec;
    let value = serde_json::json!({
        "id": 12345,
        "name": "User 12345",
        "email": "user12345@example.com",
        "scores": [1, 2, 3, 4, 5]
    });
    let bytes = codec.serialize(&value).unwrap();

    c.bench_function("codec/serialize", |b| {
        b.iter(|| codec.serialize(black_box(&value)).unwrap());
    });

    c.bench_function("codec/deserialize", |b| {
        b.iter(|| {
            let parsed: serde_json::Value = codec.deserialize(black_box(&bytes)).unwrap();
            parsed
        });
    });
}

fn bench_local_tier(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let tier = LocalTier::new(100_000);
    let payload = vec![0u8; 256];

    rt.block_on(async {
        for i in 0..1_000 {
            tier.set(&format!("app:warm:{i}"), payload.clone(), Duration::from_secs(300))
                .await;
        }
    });

    c.bench_function("local_tier/set", |b| {
        b.to_async(&rt).iter(|| async {
            tier.set(black_box("app:bench"), payload.clone(), Duration::from_secs(300))
                .await;
        });
    });

    c.bench_function("local_tier/get_hit", |b| {
        b.to_async(&rt)
            .iter(|| async { tier.get(black_box("app:warm:500")).await });
    });

    c.bench_function("local_tier/get_miss", |b| {
        b.to_async(&rt)
            .iter(|| async { tier.get(black_box("app:cold")).await });
    });
}

criterion_group!(benches, bench_key_naming, bench_codec, bench_local_tier);
criterion_main!(benches);
