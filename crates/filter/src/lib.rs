//! # Filter — Binary Fuse Membership Filters
//!
//! Space-efficient approximate-membership filters over `u64` keys with **no
//! false negatives** and a false-positive rate fixed by the fingerprint
//! width: roughly 1/256 for [`u8`] fingerprints, roughly 1/65 536 for
//! [`u16`].
//!
//! A filter is built in one shot from the complete key set
//! ([`Filter::build`]) and is immutable afterwards. Duplicate keys and
//! arbitrary input order are tolerated by the construction.
//!
//! ## Serialized layout
//!
//! ```text
//! [seed: u64][segment_length: u32][segment_length_mask: u32]
//! [segment_count: u32][segment_count_length: u32][array_length: u32]
//! [fingerprints: array_length × width bytes]
//! ```
//!
//! All integers are little-endian. The 28-byte header is everything a
//! membership test needs besides the fingerprint array, which is why
//! [`FilterView::deserialize`] can copy the header out and leave the
//! fingerprint array **in place inside the caller's buffer** — nothing is
//! allocated, and a store can answer queries with the array still sitting
//! inside a memory-mapped file.
//!
//! ## Example
//!
//! ```rust
//! use filter::Filter;
//!
//! let keys: Vec<u64> = (0..1000).collect();
//! let f: Filter<u8> = Filter::build(&keys).unwrap();
//! assert!(f.contains(500).unwrap());
//! ```

mod build;
mod persist;

pub use persist::{MappedFilter, TAG_BYTES};

use byteorder::{ByteOrder, LittleEndian};
use std::marker::PhantomData;
use std::ops::BitXor;
use thiserror::Error;

/// Serialized header size in bytes.
pub const HEADER_BYTES: usize = 28;

/// Errors surfaced by filter construction, queries, and persistence.
#[derive(Debug, Error)]
pub enum FilterError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Key count exceeds what one filter can address.
    #[error("cannot allocate a filter for {0} keys")]
    AllocationFailed(usize),

    /// No working seed was found within the retry budget.
    #[error("filter construction failed after {0} seeding attempts")]
    ConstructionFailed(usize),

    /// Membership was asked of a filter that holds no keys.
    #[error("filter is not populated")]
    NotPopulated,

    /// A buffer is too short for the header or the fingerprint array it
    /// announces.
    #[error("filter buffer truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// A persisted filter file carries the wrong type tag.
    #[error("filter type tag mismatch: expected {expected:?}, found {found:?}")]
    FormatMismatch { expected: String, found: String },
}

/// Fingerprint width selector, implemented for `u8` and `u16`.
///
/// `load`/`store` address a raw little-endian array byte-wise, so a
/// fingerprint array may start at any alignment — including odd offsets
/// inside a memory map.
pub trait Fingerprint: Copy + Eq + Default + BitXor<Output = Self> {
    /// Fingerprint width in bits (the `WW` of persisted type tags).
    const BITS: u32;
    /// Bytes occupied by one fingerprint.
    const BYTES: usize;

    /// Derives the fingerprint of a mixed key hash.
    fn from_hash(hash: u64) -> Self;
    /// Reads fingerprint `idx` out of a raw array.
    fn load(buf: &[u8], idx: usize) -> Self;
    /// Writes fingerprint `idx` into a raw array.
    fn store(buf: &mut [u8], idx: usize, value: Self);
}

impl Fingerprint for u8 {
    const BITS: u32 = 8;
    const BYTES: usize = 1;

    #[inline]
    fn from_hash(hash: u64) -> Self {
        (hash ^ (hash >> 32)) as u8
    }

    #[inline]
    fn load(buf: &[u8], idx: usize) -> Self {
        buf[idx]
    }

    #[inline]
    fn store(buf: &mut [u8], idx: usize, value: Self) {
        buf[idx] = value;
    }
}

impl Fingerprint for u16 {
    const BITS: u32 = 16;
    const BYTES: usize = 2;

    #[inline]
    fn from_hash(hash: u64) -> Self {
        (hash ^ (hash >> 32)) as u16
    }

    #[inline]
    fn load(buf: &[u8], idx: usize) -> Self {
        LittleEndian::read_u16(&buf[idx * 2..])
    }

    #[inline]
    fn store(buf: &mut [u8], idx: usize, value: Self) {
        LittleEndian::write_u16(&mut buf[idx * 2..], value);
    }
}

/// Sizing and hashing parameters of one filter.
///
/// A default-constructed header (all zeros) denotes an unpopulated filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterHeader {
    pub seed: u64,
    pub segment_length: u32,
    pub segment_length_mask: u32,
    pub segment_count: u32,
    pub segment_count_length: u32,
    pub array_length: u32,
}

impl FilterHeader {
    /// Reads a header from the first [`HEADER_BYTES`] of `buf`.
    pub fn read_from(buf: &[u8]) -> Result<Self, FilterError> {
        if buf.len() < HEADER_BYTES {
            return Err(FilterError::Truncated {
                need: HEADER_BYTES,
                have: buf.len(),
            });
        }
        Ok(Self {
            seed: LittleEndian::read_u64(&buf[0..8]),
            segment_length: LittleEndian::read_u32(&buf[8..12]),
            segment_length_mask: LittleEndian::read_u32(&buf[12..16]),
            segment_count: LittleEndian::read_u32(&buf[16..20]),
            segment_count_length: LittleEndian::read_u32(&buf[20..24]),
            array_length: LittleEndian::read_u32(&buf[24..28]),
        })
    }

    /// Writes the header into the first [`HEADER_BYTES`] of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.seed);
        LittleEndian::write_u32(&mut buf[8..12], self.segment_length);
        LittleEndian::write_u32(&mut buf[12..16], self.segment_length_mask);
        LittleEndian::write_u32(&mut buf[16..20], self.segment_count);
        LittleEndian::write_u32(&mut buf[20..24], self.segment_count_length);
        LittleEndian::write_u32(&mut buf[24..28], self.array_length);
    }

    /// Bytes occupied by the fingerprint array that follows the header.
    #[must_use]
    pub fn fingerprint_bytes<F: Fingerprint>(&self) -> usize {
        self.array_length as usize * F::BYTES
    }

    /// `true` once the header carries the sizing of a non-empty build.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.segment_count > 0
    }

    /// Membership test against a fingerprint array stored outside the
    /// header, e.g. directly inside a memory map.
    ///
    /// `fingerprints` must hold at least [`fingerprint_bytes`] bytes laid
    /// out by construction/serialization of this same header.
    ///
    /// [`fingerprint_bytes`]: FilterHeader::fingerprint_bytes
    #[must_use]
    pub fn contains_in<F: Fingerprint>(&self, fingerprints: &[u8], key: u64) -> bool {
        let hash = mix_split(key, self.seed);
        let (h0, h1, h2) = self.hash_batch(hash);
        let f = F::from_hash(hash)
            ^ F::load(fingerprints, h0 as usize)
            ^ F::load(fingerprints, h1 as usize)
            ^ F::load(fingerprints, h2 as usize);
        f == F::default()
    }

    /// The three slot indices probed for a mixed key hash.
    #[inline]
    fn hash_batch(&self, hash: u64) -> (u32, u32, u32) {
        let h0 = mulhi(hash, u64::from(self.segment_count_length)) as u32;
        let mut h1 = h0 + self.segment_length;
        let mut h2 = h1 + self.segment_length;
        h1 ^= ((hash >> 18) as u32) & self.segment_length_mask;
        h2 ^= (hash as u32) & self.segment_length_mask;
        (h0, h1, h2)
    }

    /// Slot index for probe `index` (0, 1, or 2) of a mixed key hash.
    /// Must agree probe-for-probe with [`hash_batch`]; construction peels
    /// with this form.
    ///
    /// [`hash_batch`]: FilterHeader::hash_batch
    #[inline]
    pub(crate) fn subhash(&self, index: u32, hash: u64) -> u32 {
        let mut h = mulhi(hash, u64::from(self.segment_count_length));
        h += u64::from(index * self.segment_length);
        let hh = hash & ((1u64 << 36) - 1);
        h ^= (hh >> (36 - 18 * index)) & u64::from(self.segment_length_mask);
        h as u32
    }
}

/// An immutable binary fuse filter owning its fingerprint array.
#[derive(Clone, Default)]
pub struct Filter<F: Fingerprint> {
    header: FilterHeader,
    /// Raw little-endian fingerprint array, `array_length × F::BYTES` bytes.
    fingerprints: Vec<u8>,
    _width: PhantomData<F>,
}

impl<F: Fingerprint> Filter<F> {
    /// Builds a filter containing every key in `keys`.
    ///
    /// Duplicates are tolerated and input order is irrelevant. An empty
    /// slice yields an unpopulated filter on which [`contains`] fails with
    /// [`FilterError::NotPopulated`].
    ///
    /// # Errors
    ///
    /// [`FilterError::AllocationFailed`] when the key count exceeds 32-bit
    /// addressing; [`FilterError::ConstructionFailed`] when no working seed
    /// is found within the retry budget (vanishingly unlikely on real
    /// input).
    ///
    /// [`contains`]: Filter::contains
    pub fn build(keys: &[u64]) -> Result<Self, FilterError> {
        build::build(keys)
    }

    pub(crate) fn from_parts(header: FilterHeader, fingerprints: Vec<u8>) -> Self {
        Self {
            header,
            fingerprints,
            _width: PhantomData,
        }
    }

    /// `true` if the filter was built from at least one key.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.header.is_populated()
    }

    /// The filter's sizing and hashing parameters.
    #[must_use]
    pub fn header(&self) -> FilterHeader {
        self.header
    }

    /// Returns `Ok(true)` if `key` **may** be in the set, `Ok(false)` if it
    /// is **definitely not**.
    ///
    /// # Errors
    ///
    /// [`FilterError::NotPopulated`] on a filter built from an empty key
    /// set.
    pub fn contains(&self, key: u64) -> Result<bool, FilterError> {
        if !self.is_populated() {
            return Err(FilterError::NotPopulated);
        }
        Ok(self.header.contains_in::<F>(&self.fingerprints, key))
    }

    /// Checks that every key in `keys` is reported present. A `false` here
    /// is a construction defect, not a statistical event.
    #[must_use]
    pub fn verify(&self, keys: &[u64]) -> bool {
        keys.iter().all(|&k| matches!(self.contains(k), Ok(true)))
    }

    /// Exact byte size of [`serialize_into`]'s output: header plus
    /// fingerprint array.
    ///
    /// [`serialize_into`]: Filter::serialize_into
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        HEADER_BYTES + self.fingerprints.len()
    }

    /// Serializes the filter into `buf`, which must be exactly
    /// [`serialized_size`] bytes — callers hand out exact sub-slices of
    /// their file or map.
    ///
    /// # Errors
    ///
    /// [`FilterError::NotPopulated`] on an unpopulated filter.
    ///
    /// [`serialized_size`]: Filter::serialized_size
    pub fn serialize_into(&self, buf: &mut [u8]) -> Result<(), FilterError> {
        if !self.is_populated() {
            return Err(FilterError::NotPopulated);
        }
        assert_eq!(buf.len(), self.serialized_size(), "serialize buffer size");
        self.header.write_to(&mut buf[..HEADER_BYTES]);
        buf[HEADER_BYTES..].copy_from_slice(&self.fingerprints);
        Ok(())
    }
}

impl<F: Fingerprint> std::fmt::Debug for Filter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("bits", &F::BITS)
            .field("populated", &self.is_populated())
            .field("array_length", &self.header.array_length)
            .finish()
    }
}

/// A filter whose fingerprint array lives in a caller-owned buffer.
///
/// Produced by [`FilterView::deserialize`]. The borrow ties the view to the
/// buffer — typically a memory map — so the buffer cannot be dropped or
/// remapped while views into it are alive.
#[derive(Clone, Copy)]
pub struct FilterView<'a, F: Fingerprint> {
    header: FilterHeader,
    fingerprints: &'a [u8],
    _width: PhantomData<F>,
}

impl<'a, F: Fingerprint> FilterView<'a, F> {
    /// Reads the header at the start of `buf` and borrows the fingerprint
    /// array immediately after it. Zero-copy: only the 28 header bytes are
    /// read eagerly.
    ///
    /// # Errors
    ///
    /// [`FilterError::Truncated`] when `buf` cannot hold the header or the
    /// fingerprint array it announces; [`FilterError::NotPopulated`] when
    /// the header is all zeros.
    pub fn deserialize(buf: &'a [u8]) -> Result<Self, FilterError> {
        let header = FilterHeader::read_from(buf)?;
        if !header.is_populated() {
            return Err(FilterError::NotPopulated);
        }
        let need = HEADER_BYTES + header.fingerprint_bytes::<F>();
        if buf.len() < need {
            return Err(FilterError::Truncated {
                need,
                have: buf.len(),
            });
        }
        Ok(Self {
            header,
            fingerprints: &buf[HEADER_BYTES..need],
            _width: PhantomData,
        })
    }

    /// The deserialized sizing and hashing parameters.
    #[must_use]
    pub fn header(&self) -> FilterHeader {
        self.header
    }

    /// Returns `true` if `key` may be in the set, `false` if it is
    /// definitely not.
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.header.contains_in::<F>(self.fingerprints, key)
    }
}

/// 64-bit finalizer used to mix keys with the seed and to derive
/// fingerprints.
#[inline]
pub(crate) fn murmur64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

#[inline]
pub(crate) fn mix_split(key: u64, seed: u64) -> u64 {
    murmur64(key.wrapping_add(seed))
}

/// Upper 64 bits of the 128-bit product; maps a hash uniformly onto
/// `[0, n)`.
#[inline]
pub(crate) fn mulhi(a: u64, b: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) >> 64) as u64
}

/// Seed sequence for construction retries.
#[inline]
pub(crate) fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
