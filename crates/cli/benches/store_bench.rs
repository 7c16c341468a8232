use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use store::{ShardedSink, ShardedSource};
use tempfile::tempdir;

const N_KEYS: usize = 100_000;
const SHARD_BITS: u8 = 5;

fn sorted_keys() -> Vec<u64> {
    let mut state = 0x42u64;
    let mut keys: Vec<u64> = (0..N_KEYS)
        .map(|_| {
            state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^ (z >> 31)
        })
        .collect();
    keys.sort_unstable();
    keys
}

fn build_store(path: &std::path::Path, keys: &[u64]) {
    let mut sink: ShardedSink<u8> = ShardedSink::open(path, SHARD_BITS).unwrap();
    sink.stream_prepare_with_hint(keys.len());
    for &key in keys {
        sink.stream_add(key).unwrap();
    }
    sink.stream_finalize().unwrap();
}

fn stream_build_benchmark(c: &mut Criterion) {
    let keys = sorted_keys();
    c.bench_function("stream_build_100k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.store");
                (dir, path)
            },
            |(_dir, path)| {
                build_store(&path, &keys);
            },
            BatchSize::SmallInput,
        );
    });
}

fn query_hit_benchmark(c: &mut Criterion) {
    let keys = sorted_keys();
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.store");
    build_store(&path, &keys);
    let source: ShardedSource<u8> = ShardedSource::open(&path, SHARD_BITS).unwrap();

    c.bench_function("query_hit_100k", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for &key in &keys {
                if source.contains(key) {
                    hits += 1;
                }
            }
            assert_eq!(hits, keys.len());
        });
    });
}

fn query_random_benchmark(c: &mut Criterion) {
    let keys = sorted_keys();
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.store");
    build_store(&path, &keys);
    let source: ShardedSource<u8> = ShardedSource::open(&path, SHARD_BITS).unwrap();

    c.bench_function("query_random_100k", |b| {
        let mut state = 0xfeed_face_u64;
        b.iter(|| {
            let mut hits = 0usize;
            for _ in 0..N_KEYS {
                state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
                let mut z = state;
                z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
                z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
                if source.contains(z ^ (z >> 31)) {
                    hits += 1;
                }
            }
            hits
        });
    });
}

criterion_group!(
    benches,
    stream_build_benchmark,
    query_hit_benchmark,
    query_random_benchmark
);
criterion_main!(benches);
