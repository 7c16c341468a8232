//! One-shot persistence for a single filter.
//!
//! File layout: a 16-byte type tag (`binfuseWW`, NUL-padded) followed by
//! the serialized filter. Saving streams through ordinary buffered file
//! I/O; loading memory-maps the file and answers queries straight from the
//! map without copying the fingerprint array.

use crate::{Filter, FilterError, FilterHeader, Fingerprint, HEADER_BYTES};
use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::marker::PhantomData;
use std::path::Path;

/// Bytes reserved for the type tag at the start of a filter file.
pub const TAG_BYTES: usize = 16;

/// Printable portion of the tag, e.g. `binfuse08`.
const TAG_TEXT_BYTES: usize = 9;

fn render_tag(bits: u32) -> [u8; TAG_BYTES] {
    let mut tag = [0u8; TAG_BYTES];
    let text = format!("binfuse{bits:02}");
    tag[..text.len()].copy_from_slice(text.as_bytes());
    tag
}

impl<F: Fingerprint> Filter<F> {
    /// Writes the filter to `path`: type tag, then header and fingerprint
    /// array. An existing file is truncated; the data is fsynced before
    /// returning.
    ///
    /// # Errors
    ///
    /// [`FilterError::NotPopulated`] on an unpopulated filter, otherwise
    /// I/O failures.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FilterError> {
        if !self.is_populated() {
            return Err(FilterError::NotPopulated);
        }
        let mut body = vec![0u8; self.serialized_size()];
        self.serialize_into(&mut body)?;

        let mut file = File::create(path)?;
        file.write_all(&render_tag(F::BITS))?;
        file.write_all(&body)?;
        file.sync_all()?;
        Ok(())
    }
}

/// A single filter mapped read-only from its file.
///
/// The fingerprint array is never copied out of the map, which lives as
/// long as this handle. On platforms where a mapping pins the file, drop
/// the handle before deleting the file.
pub struct MappedFilter<F: Fingerprint> {
    mmap: Mmap,
    header: FilterHeader,
    _width: PhantomData<F>,
}

impl<F: Fingerprint> MappedFilter<F> {
    /// Maps `path` and validates its type tag against the expected
    /// fingerprint width.
    ///
    /// # Errors
    ///
    /// [`FilterError::FormatMismatch`] on a foreign or wrong-width tag,
    /// [`FilterError::Truncated`] when the file cannot hold the filter its
    /// header announces.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FilterError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < TAG_BYTES + HEADER_BYTES {
            return Err(FilterError::Truncated {
                need: TAG_BYTES + HEADER_BYTES,
                have: mmap.len(),
            });
        }
        let expected = render_tag(F::BITS);
        if mmap[..TAG_BYTES] != expected {
            return Err(FilterError::FormatMismatch {
                expected: String::from_utf8_lossy(&expected[..TAG_TEXT_BYTES]).into_owned(),
                found: String::from_utf8_lossy(&mmap[..TAG_TEXT_BYTES]).into_owned(),
            });
        }

        let header = FilterHeader::read_from(&mmap[TAG_BYTES..])?;
        if !header.is_populated() {
            return Err(FilterError::NotPopulated);
        }
        let need = TAG_BYTES + HEADER_BYTES + header.fingerprint_bytes::<F>();
        if mmap.len() < need {
            return Err(FilterError::Truncated {
                need,
                have: mmap.len(),
            });
        }

        Ok(Self {
            mmap,
            header,
            _width: PhantomData,
        })
    }

    /// The mapped filter's sizing and hashing parameters.
    #[must_use]
    pub fn header(&self) -> FilterHeader {
        self.header
    }

    /// Returns `true` if `key` may be in the set, `false` if it is
    /// definitely not. Reads go directly to the mapped file.
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.header
            .contains_in::<F>(&self.mmap[TAG_BYTES + HEADER_BYTES..], key)
    }
}
