//! 64-bit fingerprints used for change detection.
//!
//! These are fast non-cryptographic hashes: collisions are accepted as a
//! performance tradeoff, since the database only uses them as a change
//! heuristic, never for content addressing.

use rustc_hash::FxHasher;
use std::hash::Hasher;

/// Separates fields fed to one hasher, so ["ab","c"] and ["a","bc"]
/// produce different fingerprints.
const UNIT_SEPARATOR: u8 = 0x1F;

/// Fingerprint a sequence of strings.
pub fn of_strings<'a>(parts: impl IntoIterator<Item = &'a str>) -> u64 {
    let mut h = FxHasher::default();
    for part in parts {
        h.write(part.as_bytes());
        h.write_u8(UNIT_SEPARATOR);
    }
    h.finish()
}

/// Fingerprint a file's contents.
pub fn of_file(path: &str) -> std::io::Result<u64> {
    let bytes = std::fs::read(path)?;
    let mut h = FxHasher::default();
    h.write(&bytes);
    Ok(h.finish())
}

/// The database key for a rule application: its target set (order
/// independent) plus the directory it runs in.
pub fn db_key(targets: &[String], dir: &str) -> u64 {
    let mut names: Vec<&str> = targets.iter().map(|t| t.as_str()).collect();
    names.sort_unstable();
    names.push(dir);
    of_strings(names)
}
