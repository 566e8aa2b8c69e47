//! Data pattern descriptors
//!
//! A pattern is a single symbol repeated a fixed number of times. The sizes
//! straddle the usual block and page boundaries (1 byte up to 1 MiB + 1) so
//! writes land unaligned as often as aligned.

use super::checksum::content_hash;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;

/// Fixed descriptor table
pub const PATTERNS: [DataPattern; 13] = [
    DataPattern::new('A', 1),
    DataPattern::new('B', 3),
    DataPattern::new('C', 17),
    DataPattern::new('D', 33),
    DataPattern::new('E', 65),
    DataPattern::new('F', 129),
    DataPattern::new('G', 257),
    DataPattern::new('H', 1025),
    DataPattern::new('I', 128 * KB + 1),
    DataPattern::new('J', 64 * KB + 1),
    DataPattern::new('K', 256 * KB + 1),
    DataPattern::new('L', 512 * KB + 1),
    DataPattern::new('M', MB + 1),
];

/// Hashes of [`PATTERNS`], computed once
static PATTERN_HASHES: LazyLock<Vec<String>> =
    LazyLock::new(|| PATTERNS.iter().map(|p| content_hash(&p.bytes())).collect());

/// A symbol repeated `repeats` times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataPattern {
    pub symbol: char,
    pub repeats: u64,
}

impl DataPattern {
    pub const fn new(symbol: char, repeats: u64) -> Self {
        Self { symbol, repeats }
    }

    /// Materialize the pattern bytes
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = [0u8; 4];
        let encoded = self.symbol.encode_utf8(&mut buf).as_bytes();
        encoded.repeat(self.repeats as usize)
    }

    /// Length in bytes
    pub fn len(&self) -> u64 {
        self.symbol.len_utf8() as u64 * self.repeats
    }

    pub fn is_empty(&self) -> bool {
        self.repeats == 0
    }

    /// Content hash of the pattern bytes
    ///
    /// Table patterns use the precomputed hash.
    pub fn hash(&self) -> String {
        match PATTERNS.iter().position(|p| p == self) {
            Some(idx) => PATTERN_HASHES[idx].clone(),
            None => content_hash(&self.bytes()),
        }
    }
}

/// Pick a pattern from the table
pub fn random_pattern<R: rand::Rng + ?Sized>(rng: &mut R) -> DataPattern {
    PATTERNS[rng.gen_range(0..PATTERNS.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_bytes() {
        let p = DataPattern::new('C', 17);
        let bytes = p.bytes();
        assert_eq!(bytes.len(), 17);
        assert!(bytes.iter().all(|&b| b == b'C'));
        assert_eq!(p.len(), 17);
    }

    #[test]
    fn test_table_hash_matches_computed() {
        let p = PATTERNS[3];
        assert_eq!(p.hash(), content_hash(&p.bytes()));

        let custom = DataPattern::new('Z', 5);
        assert_eq!(custom.hash(), content_hash(b"ZZZZZ"));
    }

    #[test]
    fn test_random_pattern_in_table() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let p = random_pattern(&mut rng);
            assert!(PATTERNS.contains(&p));
        }
    }
}
