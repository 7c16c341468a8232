//! # Store — Sharded Binary Fuse Filter Files
//!
//! A file-backed container of up to `2^B` binary fuse filters that answers
//! *"is this 64-bit key in the set?"* from a single memory-mapped file,
//! with no false negatives and a bounded false-positive rate. `B` (the
//! *shard bits*) is fixed per file; a key belongs to the shard selected by
//! its top `B` bits.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ TAG [0, 16)                                                   │
//! │                                                               │
//! │ "sbinfuseWW-CCCC\0"                                           │
//! │   WW   fingerprint width in bits, two decimal digits          │
//! │   CCCC shard capacity, four decimal digits                    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX [16, 16 + 8·CCCC)                                       │
//! │                                                               │
//! │ one u64 LE byte offset per shard slot;                        │
//! │ 0xFFFF_FFFF_FFFF_FFFF marks an empty slot                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BODY                                                          │
//! │                                                               │
//! │ serialized filters, one per populated slot, laid out in       │
//! │ insertion order: header (28 B) + fingerprint array            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The tag is printable (minus the final
//! NUL), so `xxd store.bin | head -1` tells you what a file holds.
//!
//! ## Access modes
//!
//! Writing goes through [`ShardedSink`]: either [`ShardedSink::add`] with
//! pre-built filters, one per shard, in any prefix order — or the
//! streaming API ([`ShardedSink::stream_add`]) which partitions one
//! globally sorted key stream into shards on the fly. Shards are written
//! once; the file only ever grows.
//!
//! Reading goes through [`ShardedSource`], which maps the file once,
//! validates it, and serves [`ShardedSource::contains`] with the
//! fingerprint arrays still inside the map: a query touches one index
//! slot and one filter region, allocating nothing.
//!
//! ## Example
//!
//! ```rust,no_run
//! use store::{ShardedSink, ShardedSource};
//!
//! let mut sink: ShardedSink<u8> = ShardedSink::open("keys.store", 8)?;
//! sink.stream_prepare();
//! for key in [1u64, 2, 3, 1 << 60] {
//!     sink.stream_add(key)?;
//! }
//! sink.stream_finalize()?;
//! drop(sink);
//!
//! let source: ShardedSource<u8> = ShardedSource::open("keys.store", 8)?;
//! assert!(source.contains(2));
//! # Ok::<(), store::StoreError>(())
//! ```

mod format;
mod sink;
mod source;

pub use filter::{Filter, FilterError, Fingerprint};
pub use format::{parse_tag, EMPTY, MAX_SHARD_BITS, TAG_BYTES};
pub use sink::ShardedSink;
pub use source::ShardedSource;

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the sharded store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Source open on a path that does not exist.
    #[error("store file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file's tag disagrees with the requested width or shard count.
    #[error("store tag mismatch: expected {expected:?}, found {found:?}")]
    FormatMismatch { expected: String, found: String },

    /// The file contradicts its own layout.
    #[error("corrupt store file: {0}")]
    Corrupt(String),

    /// An underlying map, resize, or sync failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `add` targeted a slot that already holds a filter.
    #[error("shard {0} is already populated")]
    SlotOccupied(u32),

    /// `add` on a store whose every slot is populated.
    #[error("store is full: all {0} shards populated")]
    CapacityExceeded(u32),

    /// `add` with a prefix outside the store's slot range.
    #[error("prefix {prefix} out of range: store holds {max_shards} shards")]
    PrefixOutOfRange { prefix: u32, max_shards: u32 },

    /// `stream_add` received a key smaller than its predecessor.
    #[error("stream key {key:#018x} sorts before {last:#018x}")]
    KeyOutOfOrder { key: u64, last: u64 },

    /// Streaming was used without a preceding `stream_prepare`.
    #[error("stream_add before stream_prepare")]
    StreamNotPrepared,

    /// Requested shard bits the tag format cannot express.
    #[error("shard_bits {0} unsupported: must be in 1..=13")]
    InvalidShardBits(u8),

    /// An error from the filter primitive during a shard build or load.
    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Shard selector: the top `shard_bits` bits of a key.
#[inline]
#[must_use]
pub fn shard_prefix(key: u64, shard_bits: u8) -> u32 {
    (key >> (64 - u32::from(shard_bits))) as u32
}

#[cfg(test)]
mod tests;
