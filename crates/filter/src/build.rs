//! Binary fuse construction: layout sizing plus seeded peeling.
//!
//! The build scatters key hashes into segments, counts slot occupancy,
//! then repeatedly peels slots touched by exactly one key. Peeling order
//! is replayed in reverse to assign fingerprints so every key's three
//! probes XOR to its fingerprint. A seed that fails to peel completely is
//! retried with the next seed in the sequence.

use crate::{mix_split, splitmix64, Filter, FilterError, FilterHeader, Fingerprint};

const ARITY: u32 = 3;
const MAX_SEGMENT_LENGTH: u32 = 1 << 18;
const MAX_ATTEMPTS: usize = 100;

/// First state of the seed sequence; construction is deterministic for a
/// given key set.
const RNG_STATE: u64 = 0x726b_2b9d_438b_9d4d;

pub(crate) fn build<F: Fingerprint>(keys: &[u64]) -> Result<Filter<F>, FilterError> {
    if keys.is_empty() {
        return Ok(Filter::from_parts(FilterHeader::default(), Vec::new()));
    }
    if keys.len() > u32::MAX as usize {
        return Err(FilterError::AllocationFailed(keys.len()));
    }
    let mut header = layout(keys.len() as u32);
    let mut fingerprints = vec![0u8; header.fingerprint_bytes::<F>()];
    populate::<F>(keys, &mut header, &mut fingerprints)?;
    Ok(Filter::from_parts(header, fingerprints))
}

/// Derives segment geometry from the key count. The constants are the
/// reference 3-wise parameters; `floor` in the segment-length exponent is
/// load-bearing.
fn layout(size: u32) -> FilterHeader {
    let segment_length =
        (1u32 << ((f64::from(size).ln() / 3.33f64.ln() + 2.25).floor() as u32)).min(MAX_SEGMENT_LENGTH);
    let segment_length_mask = segment_length - 1;

    let capacity = if size <= 1 {
        0
    } else {
        let size_factor = (0.875 + 0.25 * 1_000_000f64.ln() / f64::from(size).ln()).max(1.125);
        (f64::from(size) * size_factor).round() as u32
    };

    let init_segment_count =
        ((capacity + segment_length - 1) / segment_length).saturating_sub(ARITY - 1);
    let array_length = (init_segment_count + ARITY - 1) * segment_length;
    let mut segment_count = (array_length + segment_length - 1) / segment_length;
    segment_count = if segment_count <= ARITY - 1 {
        1
    } else {
        segment_count - (ARITY - 1)
    };
    let array_length = (segment_count + ARITY - 1) * segment_length;
    let segment_count_length = segment_count * segment_length;

    FilterHeader {
        seed: 0,
        segment_length,
        segment_length_mask,
        segment_count,
        segment_count_length,
        array_length,
    }
}

/// Occupancy bookkeeping packs a slot's key count into the top six bits of
/// a byte and the XOR of its keys' probe indices into the low two.
fn populate<F: Fingerprint>(
    keys: &[u64],
    header: &mut FilterHeader,
    fingerprints: &mut [u8],
) -> Result<(), FilterError> {
    let size = keys.len();
    let capacity = header.array_length as usize;

    let mut rng = RNG_STATE;
    header.seed = splitmix64(&mut rng);

    let mut reverse_order = vec![0u64; size + 1];
    let mut reverse_h = vec![0u8; size];
    let mut alone = vec![0u32; capacity];
    let mut t2count = vec![0u8; capacity];
    let mut t2hash = vec![0u64; capacity];

    let mut block_bits = 1u32;
    while (1u32 << block_bits) < header.segment_count {
        block_bits += 1;
    }
    let block = 1usize << block_bits;
    let mut start_pos = vec![0u32; block];

    // sentinel: keeps the placement scan from running off the end
    reverse_order[size] = 1;

    let mut stack_size = 0usize;
    let mut success = false;

    for _attempt in 0..MAX_ATTEMPTS {
        // scatter hashes into per-segment runs, roughly sorted by their
        // top bits
        for (i, pos) in start_pos.iter_mut().enumerate() {
            *pos = ((i as u64 * size as u64) >> block_bits) as u32;
        }
        for &key in keys {
            let hash = mix_split(key, header.seed);
            let mut segment_index = (hash >> (64 - block_bits)) as usize;
            while reverse_order[start_pos[segment_index] as usize] != 0 {
                segment_index = (segment_index + 1) & (block - 1);
            }
            reverse_order[start_pos[segment_index] as usize] = hash;
            start_pos[segment_index] += 1;
        }

        // count probes per slot; a duplicated hash cancels itself out of
        // its slots and is backed out and dropped
        let mut duplicates = 0usize;
        let mut error = false;
        for i in 0..size {
            let hash = reverse_order[i];
            let h0 = header.subhash(0, hash) as usize;
            t2count[h0] = t2count[h0].wrapping_add(4);
            t2hash[h0] ^= hash;
            let h1 = header.subhash(1, hash) as usize;
            t2count[h1] = t2count[h1].wrapping_add(4);
            t2count[h1] ^= 1;
            t2hash[h1] ^= hash;
            let h2 = header.subhash(2, hash) as usize;
            t2count[h2] = t2count[h2].wrapping_add(4);
            t2hash[h2] ^= hash;
            t2count[h2] ^= 2;

            if t2hash[h0] & t2hash[h1] & t2hash[h2] == 0
                && ((t2hash[h0] == 0 && t2count[h0] == 8)
                    || (t2hash[h1] == 0 && t2count[h1] == 8)
                    || (t2hash[h2] == 0 && t2count[h2] == 8))
            {
                duplicates += 1;
                t2count[h0] = t2count[h0].wrapping_sub(4);
                t2hash[h0] ^= hash;
                t2count[h1] = t2count[h1].wrapping_sub(4);
                t2count[h1] ^= 1;
                t2hash[h1] ^= hash;
                t2count[h2] = t2count[h2].wrapping_sub(4);
                t2count[h2] ^= 2;
                t2hash[h2] ^= hash;
            }

            // a counter that wrapped below 4 means an overloaded slot
            error = error || t2count[h0] < 4 || t2count[h1] < 4 || t2count[h2] < 4;
        }

        if !error {
            // queue every slot holding exactly one key, then peel
            let mut qsize = 0usize;
            for (i, &count) in t2count.iter().enumerate() {
                alone[qsize] = i as u32;
                if count >> 2 == 1 {
                    qsize += 1;
                }
            }
            stack_size = 0;
            while qsize > 0 {
                qsize -= 1;
                let index = alone[qsize] as usize;
                if t2count[index] >> 2 != 1 {
                    continue;
                }
                let hash = t2hash[index];
                let found = t2count[index] & 3;
                reverse_h[stack_size] = found;
                reverse_order[stack_size] = hash;
                stack_size += 1;

                let h = [
                    header.subhash(0, hash) as usize,
                    header.subhash(1, hash) as usize,
                    header.subhash(2, hash) as usize,
                ];
                for step in 1..ARITY as u8 {
                    let probe = mod3(found + step);
                    let other = h[probe as usize];
                    alone[qsize] = other as u32;
                    if t2count[other] >> 2 == 2 {
                        qsize += 1;
                    }
                    t2count[other] = t2count[other].wrapping_sub(4);
                    t2count[other] ^= probe;
                    t2hash[other] ^= hash;
                }
            }

            if stack_size + duplicates == size {
                success = true;
                break;
            }
        }

        reverse_order[..size].fill(0);
        t2count.fill(0);
        t2hash.fill(0);
        header.seed = splitmix64(&mut rng);
    }

    if !success {
        return Err(FilterError::ConstructionFailed(MAX_ATTEMPTS));
    }

    // replay the peel in reverse: each key's free slot absorbs whatever
    // makes its three probes XOR to the fingerprint
    for i in (0..stack_size).rev() {
        let hash = reverse_order[i];
        let found = reverse_h[i];
        let h = [
            header.subhash(0, hash) as usize,
            header.subhash(1, hash) as usize,
            header.subhash(2, hash) as usize,
        ];
        let value = F::from_hash(hash)
            ^ F::load(fingerprints, h[mod3(found + 1) as usize])
            ^ F::load(fingerprints, h[mod3(found + 2) as usize]);
        F::store(fingerprints, h[found as usize], value);
    }
    Ok(())
}

#[inline]
fn mod3(x: u8) -> u8 {
    if x > 2 {
        x - 3
    } else {
        x
    }
}
