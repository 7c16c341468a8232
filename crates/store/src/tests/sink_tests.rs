use super::helpers::{build_filter, keygen, HIGH_KEYS, LOW_KEYS};
use crate::{shard_prefix, Filter, FilterError, ShardedSink, ShardedSource, StoreError};
use tempfile::tempdir;

// -------------------- Tiny two-shard builds --------------------

#[test]
fn add_tiny_then_reopen_as_source() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tiny.store");

    let mut sink: ShardedSink<u8> = ShardedSink::open(&path, 1).unwrap();
    sink.add(&build_filter(&LOW_KEYS), 0).unwrap();
    sink.add(&build_filter(&HIGH_KEYS), 1).unwrap();
    assert_eq!(sink.shard_count(), 2);
    drop(sink);

    let source: ShardedSource<u8> = ShardedSource::open(&path, 1).unwrap();
    assert_eq!(source.shard_count(), 2);
    for &key in LOW_KEYS.iter().chain(&HIGH_KEYS) {
        assert!(source.contains(key), "false negative for {key:#x}");
    }
}

#[test]
fn add_out_of_prefix_order_is_equivalent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ooo.store");

    // high shard first; body regions end up in insertion order, queries
    // must not care
    let mut sink: ShardedSink<u8> = ShardedSink::open(&path, 1).unwrap();
    sink.add(&build_filter(&HIGH_KEYS), 1).unwrap();
    sink.add(&build_filter(&LOW_KEYS), 0).unwrap();
    assert_eq!(sink.shard_count(), 2);
    drop(sink);

    let source: ShardedSource<u8> = ShardedSource::open(&path, 1).unwrap();
    assert_eq!(source.shard_count(), 2);
    for &key in LOW_KEYS.iter().chain(&HIGH_KEYS) {
        assert!(source.contains(key));
    }
}

#[test]
fn missing_shard_short_circuits_to_false() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing.store");

    let mut sink: ShardedSink<u8> = ShardedSink::open(&path, 1).unwrap();
    sink.add(&build_filter(&HIGH_KEYS), 1).unwrap();
    assert_eq!(sink.shard_count(), 1);
    drop(sink);

    let source: ShardedSource<u8> = ShardedSource::open(&path, 1).unwrap();
    assert!(!source.contains(0x0));
    for &key in &HIGH_KEYS {
        assert!(source.contains(key));
    }
}

#[test]
fn insertion_order_does_not_change_answers() {
    let dir = tempdir().unwrap();
    let forward = dir.path().join("forward.store");
    let backward = dir.path().join("backward.store");

    let keys = keygen(11, 4_000);
    let mut shards: Vec<Vec<u64>> = vec![Vec::new(); 4];
    for &key in &keys {
        shards[shard_prefix(key, 2) as usize].push(key);
    }

    let mut sink: ShardedSink<u8> = ShardedSink::open(&forward, 2).unwrap();
    for (prefix, shard) in shards.iter().enumerate() {
        sink.add(&build_filter(shard), prefix as u32).unwrap();
    }
    drop(sink);

    let mut sink: ShardedSink<u8> = ShardedSink::open(&backward, 2).unwrap();
    for (prefix, shard) in shards.iter().enumerate().rev() {
        sink.add(&build_filter(shard), prefix as u32).unwrap();
    }
    drop(sink);

    let forward: ShardedSource<u8> = ShardedSource::open(&forward, 2).unwrap();
    let backward: ShardedSource<u8> = ShardedSource::open(&backward, 2).unwrap();
    for probe in keys.iter().copied().chain(keygen(12, 20_000)) {
        assert_eq!(forward.contains(probe), backward.contains(probe));
    }
}

// -------------------- Sink read-back --------------------

#[test]
fn sink_answers_queries_directly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("readback.store");

    let mut sink: ShardedSink<u8> = ShardedSink::open(&path, 1).unwrap();
    sink.add(&build_filter(&LOW_KEYS), 0).unwrap();
    // the add above remapped the file; answers must survive that
    sink.add(&build_filter(&HIGH_KEYS), 1).unwrap();

    for &key in LOW_KEYS.iter().chain(&HIGH_KEYS) {
        assert!(sink.contains(key));
    }
    assert_eq!(sink.shard_count(), 2);
}

#[test]
fn reopen_sink_and_extend() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("extend.store");

    let mut sink: ShardedSink<u8> = ShardedSink::open(&path, 1).unwrap();
    sink.add(&build_filter(&LOW_KEYS), 0).unwrap();
    drop(sink);

    let mut sink: ShardedSink<u8> = ShardedSink::open(&path, 1).unwrap();
    assert_eq!(sink.shard_count(), 1);
    for &key in &LOW_KEYS {
        assert!(sink.contains(key));
    }
    sink.add(&build_filter(&HIGH_KEYS), 1).unwrap();
    drop(sink);

    let source: ShardedSource<u8> = ShardedSource::open(&path, 1).unwrap();
    assert_eq!(source.shard_count(), 2);
    for &key in LOW_KEYS.iter().chain(&HIGH_KEYS) {
        assert!(source.contains(key));
    }
}

// -------------------- Error paths --------------------

#[test]
fn add_to_occupied_slot_fails() {
    let dir = tempdir().unwrap();
    let mut sink: ShardedSink<u8> =
        ShardedSink::open(dir.path().join("occupied.store"), 1).unwrap();
    sink.add(&build_filter(&LOW_KEYS), 0).unwrap();

    let err = sink.add(&build_filter(&LOW_KEYS), 0).unwrap_err();
    assert!(matches!(err, StoreError::SlotOccupied(0)));
    assert_eq!(sink.shard_count(), 1);
}

#[test]
fn add_beyond_capacity_fails() {
    let dir = tempdir().unwrap();
    let mut sink: ShardedSink<u8> = ShardedSink::open(dir.path().join("full.store"), 1).unwrap();
    sink.add(&build_filter(&LOW_KEYS), 0).unwrap();
    sink.add(&build_filter(&HIGH_KEYS), 1).unwrap();

    let err = sink.add(&build_filter(&LOW_KEYS), 0).unwrap_err();
    assert!(matches!(err, StoreError::CapacityExceeded(2)));
}

#[test]
fn add_prefix_out_of_range_fails() {
    let dir = tempdir().unwrap();
    let mut sink: ShardedSink<u8> = ShardedSink::open(dir.path().join("range.store"), 1).unwrap();

    let err = sink.add(&build_filter(&LOW_KEYS), 2).unwrap_err();
    assert!(matches!(
        err,
        StoreError::PrefixOutOfRange {
            prefix: 2,
            max_shards: 2
        }
    ));
}

#[test]
fn add_unpopulated_filter_fails() {
    let dir = tempdir().unwrap();
    let mut sink: ShardedSink<u8> = ShardedSink::open(dir.path().join("empty.store"), 1).unwrap();

    let empty: Filter<u8> = Filter::build(&[]).unwrap();
    assert!(matches!(
        sink.add(&empty, 0),
        Err(StoreError::Filter(FilterError::NotPopulated))
    ));
    assert_eq!(sink.shard_count(), 0);
}

#[test]
fn open_sink_rejects_invalid_shard_bits() {
    let dir = tempdir().unwrap();
    for bits in [0u8, 14, 64] {
        let err = ShardedSink::<u8>::open(dir.path().join("bits.store"), bits).unwrap_err();
        assert!(matches!(err, StoreError::InvalidShardBits(b) if b == bits));
    }
}

#[test]
fn open_sink_on_truncated_file_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stub.store");
    std::fs::write(&path, b"sbinfuse").unwrap();

    assert!(matches!(
        ShardedSink::<u8>::open(&path, 1),
        Err(StoreError::Corrupt(_))
    ));
}

#[test]
fn open_sink_rejects_foreign_tag() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("foreign.store");
    // right size, wrong magic
    std::fs::write(&path, vec![b'x'; 32]).unwrap();

    assert!(matches!(
        ShardedSink::<u8>::open(&path, 1),
        Err(StoreError::FormatMismatch { .. })
    ));
}
