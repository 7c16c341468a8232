use crate::{Filter, Fingerprint, ShardedSink, ShardedSource};
use std::path::Path;

/// Keys routed to shard 0 of a 1-bit store (MSB clear).
pub const LOW_KEYS: [u64; 3] = [0x0, 0x1, 0x2];

/// Keys routed to shard 1 of a 1-bit store (MSB set).
pub const HIGH_KEYS: [u64; 3] = [
    0x8000_0000_0000_0000,
    0x8000_0000_0000_0001,
    0x8000_0000_0000_0002,
];

/// Deterministic pseudo-random key stream.
pub fn keygen(seed: u64, n: usize) -> Vec<u64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^ (z >> 31)
        })
        .collect()
}

/// Builds a filter from `keys`, panicking on construction failure.
pub fn build_filter<F: Fingerprint>(keys: &[u64]) -> Filter<F> {
    Filter::build(keys).expect("filter construction")
}

/// Streams sorted `keys` into a fresh store file at `path`.
pub fn build_streamed<F: Fingerprint>(path: &Path, shard_bits: u8, sorted_keys: &[u64]) {
    let mut sink: ShardedSink<F> = ShardedSink::open(path, shard_bits).expect("open sink");
    sink.stream_prepare_with_hint(sorted_keys.len());
    for &key in sorted_keys {
        sink.stream_add(key).expect("stream_add");
    }
    sink.stream_finalize().expect("stream_finalize");
}

/// Fraction of `probes` uniform random keys reported present.
pub fn fp_rate<F: Fingerprint>(source: &ShardedSource<F>, probes: usize) -> f64 {
    let mut hits = 0usize;
    for key in keygen(0xdead_beef_cafe_f00d, probes) {
        if source.contains(key) {
            hits += 1;
        }
    }
    hits as f64 / probes as f64
}
