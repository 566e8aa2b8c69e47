//! Entry name allocation
//!
//! Names are 64 random alphanumerics unless a seed list was supplied, in
//! which case the list is consumed first.

use crate::error::ConfigError;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::VecDeque;
use std::fs;
use std::io::BufRead;
use std::path::Path;

/// Length of generated names
pub const NAME_LEN: usize = 64;

/// Random alphanumeric name
pub fn random_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..NAME_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

/// Source of entry names
#[derive(Debug, Default)]
pub struct NamePool {
    seeded: VecDeque<String>,
}

impl NamePool {
    /// Random names only
    pub fn random() -> Self {
        Self::default()
    }

    /// Seed from one name per line; blank lines are skipped
    pub fn from_reader<R: BufRead>(reader: R) -> std::io::Result<Self> {
        let mut seeded = VecDeque::new();
        for line in reader.lines() {
            let line = line?;
            let name = line.trim();
            if !name.is_empty() && !name.contains('/') {
                seeded.push_back(name.to_string());
            }
        }
        Ok(Self { seeded })
    }

    /// Seed from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = fs::File::open(path).map_err(|e| ConfigError::InvalidNameList {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_reader(std::io::BufReader::new(file)).map_err(|e| {
            ConfigError::InvalidNameList {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })
    }

    /// Names left in the seed list
    pub fn seeded_remaining(&self) -> usize {
        self.seeded.len()
    }

    /// Next name
    pub fn next_name<R: Rng + ?Sized>(&mut self, rng: &mut R) -> String {
        self.seeded.pop_front().unwrap_or_else(|| random_name(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_random_name_shape() {
        let name = random_name(&mut rand::thread_rng());
        assert_eq!(name.len(), NAME_LEN);
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_seeded_names_first() {
        let input = Cursor::new("alpha\n\n  beta  \nbad/name\n");
        let mut pool = NamePool::from_reader(input).unwrap();
        assert_eq!(pool.seeded_remaining(), 2);

        let mut rng = rand::thread_rng();
        assert_eq!(pool.next_name(&mut rng), "alpha");
        assert_eq!(pool.next_name(&mut rng), "beta");
        assert_eq!(pool.next_name(&mut rng).len(), NAME_LEN);
    }

    #[test]
    fn test_load_missing_file() {
        let err = NamePool::load(Path::new("/nonexistent/filenames.dat")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNameList { .. }));
    }
}
