//! # CLI — Shardfuse command line
//!
//! Builds and inspects sharded binary fuse filter stores from the shell.
//!
//! ## Commands
//!
//! ```text
//! build <keys.txt> <store.bin>   Stream a key file into a new store
//! query <store.bin> <hexkey>...  Test membership for one or more keys
//! probe <store.bin> <n>          Estimate the false-positive rate with
//!                                n uniform random probes
//! info  <store.bin>              Print tag, shard count, and file size
//! ```
//!
//! Key files hold one 64-bit key per line, hex-encoded (with or without a
//! `0x` prefix). `build` sorts the keys before streaming, so the input
//! need not be ordered.
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! SHARDFUSE_WIDTH       Fingerprint width in bits, 8 or 16 (default: 8)
//! SHARDFUSE_SHARD_BITS  Shard-bit width, 1..=13         (default: 8)
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli -- build keys.txt keys.store
//! built keys.store: 100000 keys, 256/256 shards, 8-bit fingerprints, 134572 bytes
//! $ cargo run -p cli -- query keys.store 1f00ff00aa
//! 0x0000001f00ff00aa present
//! ```

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::env;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use store::{parse_tag, Fingerprint, ShardedSink, ShardedSource, TAG_BYTES};

const USAGE: &str = "usage: cli <command> [args]

commands:
  build <keys.txt> <store.bin>   stream a key file into a new store
  query <store.bin> <hexkey>...  test membership for one or more keys
  probe <store.bin> <n>          estimate the false-positive rate
  info  <store.bin>              print tag, shard count, and file size

environment:
  SHARDFUSE_WIDTH       fingerprint width in bits, 8 or 16 (default: 8)
  SHARDFUSE_SHARD_BITS  shard-bit width, 1..=13            (default: 8)";

/// Reads a configuration value from the environment, falling back to
/// `default`.
fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    let width: u32 = env_or("SHARDFUSE_WIDTH", "8")
        .parse()
        .context("SHARDFUSE_WIDTH must be a number")?;
    let shard_bits: u8 = env_or("SHARDFUSE_SHARD_BITS", "8")
        .parse()
        .context("SHARDFUSE_SHARD_BITS must be a number")?;

    match width {
        8 => run::<u8>(&args, shard_bits),
        16 => run::<u16>(&args, shard_bits),
        other => bail!("SHARDFUSE_WIDTH must be 8 or 16, got {other}"),
    }
}

fn run<F: Fingerprint>(args: &[String], shard_bits: u8) -> Result<()> {
    match args {
        [cmd, keys_path, store_path] if cmd == "build" => {
            build::<F>(keys_path.as_ref(), store_path.as_ref(), shard_bits)
        }
        [cmd, store_path, keys @ ..] if cmd == "query" && !keys.is_empty() => {
            query::<F>(store_path.as_ref(), keys, shard_bits)
        }
        [cmd, store_path, probes] if cmd == "probe" => {
            probe::<F>(store_path.as_ref(), probes, shard_bits)
        }
        [cmd, store_path] if cmd == "info" => info(store_path.as_ref()),
        _ => {
            eprintln!("{USAGE}");
            bail!("unrecognized arguments");
        }
    }
}

/// Parses one hex key line, tolerating an optional `0x` prefix.
fn parse_key(text: &str) -> Result<u64> {
    let text = text.trim();
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16).with_context(|| format!("bad hex key {text:?}"))
}

fn load_keys(path: &Path) -> Result<Vec<u64>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_key)
        .collect()
}

fn build<F: Fingerprint>(keys_path: &Path, store_path: &Path, shard_bits: u8) -> Result<()> {
    let mut keys = load_keys(keys_path)?;
    keys.sort_unstable();

    let mut sink: ShardedSink<F> = ShardedSink::open(store_path, shard_bits)?;
    sink.stream_prepare_with_hint(keys.len());
    for &key in &keys {
        sink.stream_add(key)?;
    }
    sink.stream_finalize()?;
    sink.sync()?;

    let size = fs::metadata(store_path)?.len();
    println!(
        "built {}: {} keys, {}/{} shards, {}-bit fingerprints, {} bytes",
        store_path.display(),
        keys.len(),
        sink.shard_count(),
        1u32 << shard_bits,
        F::BITS,
        size
    );
    Ok(())
}

fn query<F: Fingerprint>(store_path: &Path, keys: &[String], shard_bits: u8) -> Result<()> {
    let source: ShardedSource<F> = ShardedSource::open(store_path, shard_bits)?;
    for text in keys {
        let key = parse_key(text)?;
        let verdict = if source.contains(key) { "present" } else { "absent" };
        println!("{key:#018x} {verdict}");
    }
    Ok(())
}

fn probe<F: Fingerprint>(store_path: &Path, probes: &str, shard_bits: u8) -> Result<()> {
    let probes: usize = probes.parse().context("probe count must be a number")?;
    let source: ShardedSource<F> = ShardedSource::open(store_path, shard_bits)?;

    let mut state = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5bd1_e995);
    let mut hits = 0usize;
    for _ in 0..probes {
        if source.contains(splitmix64(&mut state)) {
            hits += 1;
        }
    }
    println!(
        "{hits} of {probes} random probes hit: fp rate {:.6}",
        hits as f64 / probes as f64
    );
    Ok(())
}

fn info(store_path: &Path) -> Result<()> {
    let bytes = fs::read(store_path).with_context(|| format!("reading {}", store_path.display()))?;
    let (bits, max_shards) = parse_tag(&bytes)?;

    let index_end = TAG_BYTES + 8 * max_shards as usize;
    if bytes.len() < index_end {
        bail!("file too small for its {max_shards}-entry index");
    }
    let populated = (0..max_shards as usize)
        .filter(|i| LittleEndian::read_u64(&bytes[TAG_BYTES + 8 * i..]) != u64::MAX)
        .count();

    println!(
        "{}: {bits}-bit fingerprints, {populated}/{max_shards} shards, {} bytes",
        store_path.display(),
        bytes.len()
    );
    Ok(())
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
