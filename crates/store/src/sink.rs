//! Writable half of the sharded store.
//!
//! The sink grows the backing file one shard at a time: flush the current
//! map, extend the file to fit the incoming filter, remap, serialize the
//! filter body, and only then point the index slot at it. A crash before
//! the index write leaves the slot empty and the file valid; a crash after
//! it leaves a fully written shard.

use crate::format::{self, Slot, EMPTY, TAG_BYTES};
use crate::{shard_prefix, StoreError};
use byteorder::{ByteOrder, LittleEndian};
use filter::{Filter, FilterError, Fingerprint};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Exclusive writer for one store file.
///
/// A sink answers [`contains`](ShardedSink::contains) for the shards
/// written so far, so a build can be verified without reopening the file.
/// There must be at most one sink per file; the type takes no cross-process
/// lock.
pub struct ShardedSink<F: Fingerprint> {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    shard_bits: u8,
    /// In-memory mirror of the on-disk offset index.
    index: Vec<u64>,
    /// Parsed headers of populated shards; file offsets, so remaps do not
    /// invalidate them.
    slots: Vec<Option<Slot>>,
    shard_count: u32,
    stream: Option<StreamBuilder>,
    _width: PhantomData<F>,
}

/// Key buffer for the shard currently being assembled by the streaming
/// build.
struct StreamBuilder {
    keys: Vec<u64>,
    last_prefix: u32,
    last_key: u64,
}

impl<F: Fingerprint> ShardedSink<F> {
    /// Opens `path` for writing, creating and initializing the file if it
    /// does not exist or is empty. An existing file must carry the matching
    /// tag; its populated shards are kept and new shards append after them.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corrupt`] on a non-empty file shorter than tag+index
    /// or with a broken index, [`StoreError::FormatMismatch`] on a foreign
    /// tag, [`StoreError::InvalidShardBits`] outside `1..=13`.
    pub fn open<P: AsRef<Path>>(path: P, shard_bits: u8) -> Result<Self, StoreError> {
        format::validate_shard_bits(shard_bits)?;
        let path = path.as_ref().to_path_buf();
        let max_shards = format::max_shards(shard_bits);
        let body_start = format::body_start(shard_bits);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let size = file.metadata()?.len();

        if size == 0 {
            file.set_len(body_start)?;
            let mut mmap = unsafe { MmapMut::map_mut(&file)? };
            mmap[..TAG_BYTES].copy_from_slice(&format::render_tag::<F>(shard_bits));
            for prefix in 0..max_shards {
                LittleEndian::write_u64(&mut mmap[format::index_offset(prefix)..], EMPTY);
            }
            mmap.flush()?;
            return Ok(Self {
                path,
                file,
                mmap,
                shard_bits,
                index: vec![EMPTY; max_shards as usize],
                slots: vec![None; max_shards as usize],
                shard_count: 0,
                stream: None,
                _width: PhantomData,
            });
        }

        if size < body_start {
            return Err(StoreError::Corrupt(format!(
                "file is {size} bytes, smaller than its {body_start}-byte tag and index"
            )));
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        format::check_tag::<F>(&mmap, shard_bits)?;
        let (index, slots, shard_count) = format::load_index::<F>(&mmap, shard_bits)?;

        Ok(Self {
            path,
            file,
            mmap,
            shard_bits,
            index,
            slots,
            shard_count,
            stream: None,
            _width: PhantomData,
        })
    }

    /// Places a built filter into shard slot `prefix`.
    ///
    /// Shards may arrive in any prefix order; each slot can be written
    /// once. The filter body is serialized before the index entry is
    /// updated, so an interrupted add leaves the slot empty rather than
    /// pointing at a torn region.
    ///
    /// # Errors
    ///
    /// [`StoreError::CapacityExceeded`], [`StoreError::PrefixOutOfRange`],
    /// [`StoreError::SlotOccupied`], [`FilterError::NotPopulated`] for an
    /// empty filter, or I/O failures from resize/remap/sync.
    pub fn add(&mut self, new_filter: &Filter<F>, prefix: u32) -> Result<(), StoreError> {
        let max_shards = format::max_shards(self.shard_bits);
        if self.shard_count == max_shards {
            return Err(StoreError::CapacityExceeded(max_shards));
        }
        if prefix >= max_shards {
            return Err(StoreError::PrefixOutOfRange { prefix, max_shards });
        }
        if self.index[prefix as usize] != EMPTY {
            return Err(StoreError::SlotOccupied(prefix));
        }
        if !new_filter.is_populated() {
            return Err(StoreError::Filter(FilterError::NotPopulated));
        }

        let size_req = new_filter.serialized_size();
        let new_offset = self.mmap.len() as u64;
        let new_size = new_offset + size_req as u64;

        self.mmap.flush()?;
        self.file.set_len(new_size)?;
        self.remap()?;

        let body = new_offset as usize;
        new_filter.serialize_into(&mut self.mmap[body..body + size_req])?;
        LittleEndian::write_u64(&mut self.mmap[format::index_offset(prefix)..], new_offset);

        self.index[prefix as usize] = new_offset;
        self.slots[prefix as usize] = Some(Slot::load::<F>(&self.mmap, new_offset)?);
        self.shard_count += 1;
        self.mmap.flush()?;
        Ok(())
    }

    /// Resets the streaming state. Must be called before
    /// [`stream_add`](ShardedSink::stream_add).
    pub fn stream_prepare(&mut self) {
        self.stream_prepare_with_hint(0);
    }

    /// Like [`stream_prepare`](ShardedSink::stream_prepare), but reserves
    /// the per-shard key buffer for `keys_hint / max_shards` keys up front
    /// — the expected shard size under a uniform key distribution — to
    /// avoid reallocation churn during the build.
    pub fn stream_prepare_with_hint(&mut self, keys_hint: usize) {
        let per_shard = keys_hint / format::max_shards(self.shard_bits) as usize;
        self.stream = Some(StreamBuilder {
            keys: Vec::with_capacity(per_shard),
            last_prefix: 0,
            last_key: 0,
        });
    }

    /// Feeds one key of a globally non-decreasing stream.
    ///
    /// When the key's prefix moves past the shard being buffered, that
    /// shard is built and written first. Prefixes that never receive a key
    /// stay empty.
    ///
    /// # Errors
    ///
    /// [`StoreError::KeyOutOfOrder`] when `key` sorts before its
    /// predecessor, [`StoreError::StreamNotPrepared`] without a preceding
    /// [`stream_prepare`](ShardedSink::stream_prepare), plus anything
    /// [`add`](ShardedSink::add) can return for the flushed shard.
    pub fn stream_add(&mut self, key: u64) -> Result<(), StoreError> {
        let stream = self.stream.as_mut().ok_or(StoreError::StreamNotPrepared)?;
        if key < stream.last_key {
            return Err(StoreError::KeyOutOfOrder {
                key,
                last: stream.last_key,
            });
        }
        stream.last_key = key;

        let prefix = shard_prefix(key, self.shard_bits);
        if prefix == stream.last_prefix {
            stream.keys.push(key);
            return Ok(());
        }

        let mut keys = std::mem::take(&mut stream.keys);
        let flushed_prefix = stream.last_prefix;
        stream.last_prefix = prefix;

        if !keys.is_empty() {
            let built = Filter::build(&keys)?;
            self.add(&built, flushed_prefix)?;
            keys.clear();
        }

        // hand the buffer back with its allocation intact
        let stream = self.stream.as_mut().ok_or(StoreError::StreamNotPrepared)?;
        stream.keys = keys;
        stream.keys.push(key);
        Ok(())
    }

    /// Builds and writes the trailing shard, then returns the sink to the
    /// idle state. A stream that buffered no keys finalizes as a no-op.
    ///
    /// # Errors
    ///
    /// [`StoreError::StreamNotPrepared`] without a preceding
    /// [`stream_prepare`](ShardedSink::stream_prepare), plus anything
    /// [`add`](ShardedSink::add) can return.
    pub fn stream_finalize(&mut self) -> Result<(), StoreError> {
        let stream = self.stream.take().ok_or(StoreError::StreamNotPrepared)?;
        if !stream.keys.is_empty() {
            let built = Filter::build(&stream.keys)?;
            self.add(&built, stream.last_prefix)?;
        }
        Ok(())
    }

    /// Membership test against the shards written so far. Keys routed to a
    /// still-empty slot return `false`.
    #[must_use]
    pub fn contains(&self, needle: u64) -> bool {
        match self.slots[shard_prefix(needle, self.shard_bits) as usize] {
            Some(slot) => slot.contains::<F>(&self.mmap, needle),
            None => false,
        }
    }

    /// Number of populated shards.
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// The store's fixed shard-bit width.
    #[must_use]
    pub fn shard_bits(&self) -> u8 {
        self.shard_bits
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the map to disk, reporting any error. Dropping the sink
    /// flushes too, but swallows failures.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.mmap.flush()?;
        Ok(())
    }

    /// Drops the current map and maps the resized file again. Slot offsets
    /// stay valid across the remap; only the map base moves.
    fn remap(&mut self) -> Result<(), StoreError> {
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }
}

/// Best-effort flush on drop; use [`ShardedSink::sync`] when the error
/// matters.
impl<F: Fingerprint> Drop for ShardedSink<F> {
    fn drop(&mut self) {
        let _ = self.mmap.flush();
    }
}

impl<F: Fingerprint> std::fmt::Debug for ShardedSink<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedSink")
            .field("path", &self.path)
            .field("bits", &F::BITS)
            .field("shard_bits", &self.shard_bits)
            .field("shard_count", &self.shard_count)
            .finish()
    }
}
