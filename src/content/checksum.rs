//! Hashing helpers built on gxhash
//!
//! gxhash is a fast non-cryptographic hash using hardware AES instructions.
//! Everything hashed here is compared only between processes of the same
//! build, so a fixed seed is all the stability that is needed.

use gxhash::GxHasher;
use std::hash::Hasher;

/// Seed for the second half of the 128-bit content hash
const SECOND_SEED: i64 = 0x517cc1b727220a95;

/// Compute a 128-bit content hash, hex encoded (32 characters)
///
/// Used for data patterns: the controller and the worker must agree on the
/// hash of a pattern, and the worker hashes what it reads back from disk.
///
/// # Example
///
/// ```
/// use nfs_dynamo::content::checksum::content_hash;
///
/// let hash = content_hash(b"AAAA");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = GxHasher::with_seed(0);
    hasher.write(content);
    let hash = hasher.finish();

    let mut hasher2 = GxHasher::with_seed(SECOND_SEED);
    hasher2.write(content);
    let hash2 = hasher2.finish();

    format!("{:016x}{:016x}", hash, hash2)
}

/// Fingerprint of an entry name, used as the key in directory file maps
pub fn name_fingerprint(name: &str) -> String {
    let mut hasher = GxHasher::with_seed(0);
    hasher.write(name.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// Deterministic id of a lock range held by one process
pub fn lock_id(handle: u64, host: &str, pid: u32, offset: u64, length: u64) -> String {
    let mut hasher = GxHasher::with_seed(0);
    hasher.write_u64(handle);
    hasher.write(host.as_bytes());
    hasher.write_u32(pid);
    hasher.write_u64(offset);
    hasher.write_u64(length);
    format!("{:016x}", hasher.finish())
}
