//! Read-only half of the sharded store.

use crate::format::{self, Slot};
use crate::{shard_prefix, StoreError};
use filter::Fingerprint;
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

/// A store file mapped read-only for queries.
///
/// Opening validates the tag, loads the offset index, and parses every
/// populated shard's filter header; the fingerprint arrays stay inside the
/// map for the handle's whole lifetime. Queries therefore touch one index
/// slot and one filter region and allocate nothing.
///
/// The file is never written, so any number of sources — across threads or
/// processes — may map the same file concurrently.
pub struct ShardedSource<F: Fingerprint> {
    mmap: Mmap,
    shard_bits: u8,
    shard_count: u32,
    slots: Vec<Option<Slot>>,
    _width: PhantomData<F>,
}

impl<F: Fingerprint> ShardedSource<F> {
    /// Maps an existing store file and validates it against the expected
    /// width and shard bits.
    ///
    /// # Errors
    ///
    /// [`StoreError::FileNotFound`] when `path` does not exist,
    /// [`StoreError::FormatMismatch`] on a tag with a different width or
    /// shard count, [`StoreError::Corrupt`] when the file contradicts its
    /// own layout, [`StoreError::InvalidShardBits`] outside `1..=13`.
    pub fn open<P: AsRef<Path>>(path: P, shard_bits: u8) -> Result<Self, StoreError> {
        format::validate_shard_bits(shard_bits)?;
        let path = path.as_ref();

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata()?.len();
        let body_start = format::body_start(shard_bits);
        if size < body_start {
            return Err(StoreError::Corrupt(format!(
                "file is {size} bytes, smaller than its {body_start}-byte tag and index"
            )));
        }

        let mmap = unsafe { Mmap::map(&file)? };
        format::check_tag::<F>(&mmap, shard_bits)?;
        let (_index, slots, shard_count) = format::load_index::<F>(&mmap, shard_bits)?;

        Ok(Self {
            mmap,
            shard_bits,
            shard_count,
            slots,
            _width: PhantomData,
        })
    }

    /// Returns `true` if `needle` may be in the set, `false` if it is
    /// definitely not. A key routed to an empty slot returns `false`
    /// without touching any filter region.
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
}

impl<F: Fingerprint> std::fmt::Debug for ShardedSource<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedSource")
            .field("bits", &F::BITS)
            .field("shard_bits", &self.shard_bits)
            .field("shard_count", &self.shard_count)
            .finish()
    }
}
