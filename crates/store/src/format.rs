//! On-disk format shared by the sink and the source: tag rendering and
//! parsing, index geometry, and per-shard slot loading.

use crate::StoreError;
use byteorder::{ByteOrder, LittleEndian};
use filter::{FilterHeader, Fingerprint, HEADER_BYTES};

/// Bytes reserved for the file tag.
pub const TAG_BYTES: usize = 16;

/// Index entry marking an unpopulated shard slot.
pub const EMPTY: u64 = u64::MAX;

/// Largest supported shard-bit width. The tag stores the shard capacity as
/// four decimal digits, so `2^13 = 8192` is the largest expressible count.
pub const MAX_SHARD_BITS: u8 = 13;

/// Printable portion of the tag, e.g. `sbinfuse08-0064`.
const TAG_TEXT_BYTES: usize = 15;

/// Byte offsets of the decimal shard-capacity digits within the tag.
const CAPACITY_DIGITS: std::ops::Range<usize> = 11..15;

pub(crate) fn validate_shard_bits(shard_bits: u8) -> Result<(), StoreError> {
    if (1..=MAX_SHARD_BITS).contains(&shard_bits) {
        Ok(())
    } else {
        Err(StoreError::InvalidShardBits(shard_bits))
    }
}

/// Number of shard slots for a bit width.
#[inline]
pub(crate) fn max_shards(shard_bits: u8) -> u32 {
    1u32 << shard_bits
}

/// Byte offset of the index entry for `prefix`.
#[inline]
pub(crate) fn index_offset(prefix: u32) -> usize {
    TAG_BYTES + 8 * prefix as usize
}

/// Byte offset of the first filter body: everything before it is tag and
/// index.
#[inline]
pub(crate) fn body_start(shard_bits: u8) -> u64 {
    TAG_BYTES as u64 + 8 * u64::from(max_shards(shard_bits))
}

/// Renders the 16-byte tag, e.g. `sbinfuse08-0064\0` for an 8-bit-width
/// store with 64 shard slots.
pub(crate) fn render_tag<F: Fingerprint>(shard_bits: u8) -> [u8; TAG_BYTES] {
    let text = format!("sbinfuse{:02}-{:04}", F::BITS, max_shards(shard_bits));
    debug_assert_eq!(text.len(), TAG_TEXT_BYTES);
    let mut tag = [0u8; TAG_BYTES];
    tag[..TAG_TEXT_BYTES].copy_from_slice(text.as_bytes());
    tag
}

/// Checks the tag at the start of `map` against the expected width and
/// shard count.
pub(crate) fn check_tag<F: Fingerprint>(map: &[u8], shard_bits: u8) -> Result<(), StoreError> {
    let expected = render_tag::<F>(shard_bits);
    if map.len() < TAG_BYTES || map[..TAG_BYTES] != expected {
        return Err(StoreError::FormatMismatch {
            expected: String::from_utf8_lossy(&expected[..TAG_TEXT_BYTES]).into_owned(),
            found: String::from_utf8_lossy(map.get(..TAG_TEXT_BYTES).unwrap_or(map)).into_owned(),
        });
    }
    Ok(())
}

/// Parses `(fingerprint_bits, max_shards)` out of an arbitrary store tag,
/// for tooling that inspects files without knowing their parameters up
/// front. The capacity digits sit at bytes 11..15.
pub fn parse_tag(map: &[u8]) -> Result<(u32, u32), StoreError> {
    fn mismatch(map: &[u8]) -> StoreError {
        StoreError::FormatMismatch {
            expected: "sbinfuseWW-CCCC".to_owned(),
            found: String::from_utf8_lossy(map.get(..TAG_TEXT_BYTES).unwrap_or(map)).into_owned(),
        }
    }
    if map.len() < TAG_BYTES
        || &map[..8] != b"sbinfuse"
        || map[10] != b'-'
        || map[TAG_TEXT_BYTES] != 0
    {
        return Err(mismatch(map));
    }
    let digits = |range: std::ops::Range<usize>| -> Result<u32, StoreError> {
        std::str::from_utf8(&map[range])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| mismatch(map))
    };
    Ok((digits(8..10)?, digits(CAPACITY_DIGITS)?))
}

/// Location of one populated shard inside the map: its parsed header plus
/// the byte offset of its fingerprint array. Offsets stay valid across
/// remaps, so a slot outlives any single mapping of the file.
#[derive(Clone, Copy)]
pub(crate) struct Slot {
    pub header: FilterHeader,
    pub fp_offset: usize,
}

impl Slot {
    /// Parses the filter at `offset` and bounds-checks its fingerprint
    /// region against the map.
    pub(crate) fn load<F: Fingerprint>(map: &[u8], offset: u64) -> Result<Slot, StoreError> {
        let offset = offset as usize;
        if offset > map.len() {
            return Err(StoreError::Corrupt(format!(
                "filter offset {offset} past end of file"
            )));
        }
        let header = FilterHeader::read_from(&map[offset..]).map_err(|_| {
            StoreError::Corrupt(format!("filter header at {offset} runs past end of file"))
        })?;
        if !header.is_populated() {
            return Err(StoreError::Corrupt(format!(
                "unpopulated filter header at {offset}"
            )));
        }
        let fp_offset = offset + HEADER_BYTES;
        let end = fp_offset + header.fingerprint_bytes::<F>();
        if end > map.len() {
            return Err(StoreError::Corrupt(format!(
                "filter at {offset} announces {} fingerprint bytes, past end of file",
                header.fingerprint_bytes::<F>()
            )));
        }
        Ok(Slot { header, fp_offset })
    }

    /// Membership test straight against the map.
    #[inline]
    pub(crate) fn contains<F: Fingerprint>(&self, map: &[u8], key: u64) -> bool {
        self.header.contains_in::<F>(&map[self.fp_offset..], key)
    }

    /// End of this slot's byte region.
    pub(crate) fn end<F: Fingerprint>(&self) -> u64 {
        (self.fp_offset + self.header.fingerprint_bytes::<F>()) as u64
    }
}

/// Loads the offset index from `map` and parses every populated slot.
/// Returns the raw index, the slot table, and the populated-slot count.
pub(crate) fn load_index<F: Fingerprint>(
    map: &[u8],
    shard_bits: u8,
) -> Result<(Vec<u64>, Vec<Option<Slot>>, u32), StoreError> {
    let max_shards = max_shards(shard_bits);
    let body = body_start(shard_bits);

    let mut index = vec![EMPTY; max_shards as usize];
    let mut slots = vec![None; max_shards as usize];
    let mut count = 0u32;
    let mut regions: Vec<(u64, u64)> = Vec::new();

    for prefix in 0..max_shards {
        let offset = LittleEndian::read_u64(&map[index_offset(prefix)..]);
        index[prefix as usize] = offset;
        if offset == EMPTY {
            continue;
        }
        if offset < body || offset >= map.len() as u64 {
            return Err(StoreError::Corrupt(format!(
                "index entry {prefix} points at {offset}, outside the filter body"
            )));
        }
        let slot = Slot::load::<F>(map, offset)?;
        regions.push((offset, slot.end::<F>()));
        slots[prefix as usize] = Some(slot);
        count += 1;
    }

    regions.sort_unstable();
    for pair in regions.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(StoreError::Corrupt(format!(
                "filter regions at {} and {} overlap",
                pair[0].0, pair[1].0
            )));
        }
    }

    Ok((index, slots, count))
}
