//! Content fingerprints and data patterns

pub mod checksum;
pub mod pattern;

pub use checksum::{content_hash, lock_id, name_fingerprint};
pub use pattern::{random_pattern, DataPattern, PATTERNS};
