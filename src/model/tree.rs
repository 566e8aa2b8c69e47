//! The namespace model
//!
//! Three indexes are kept consistent by every method here:
//! - `dirs`: the live set (and id pool), name → directory
//! - `synced`: directories whose mkdir was confirmed
//! - `pending`: directories whose mkdir was not confirmed yet
//!
//! All updates go through `&mut self`, so readers never observe a directory
//! in one index but not the other.

use super::directory::Directory;
use super::names::NamePool;
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Default directory cap
pub const DEFAULT_MAX_DIRS: usize = 100;

/// Default files-per-directory threshold
pub const DEFAULT_MAX_FILES_PER_DIR: usize = 10_000;

/// Default entry-size threshold
pub const DEFAULT_MAX_DIR_SIZE: u64 = 128 * 1024;

/// Thresholds applied by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    /// Stop appending new directories beyond this many live ones
    pub max_dirs: usize,
    /// Evict a directory once it holds this many file records
    pub max_files_per_dir: usize,
    /// Evict a directory once its entry size reaches this
    pub max_dir_size: u64,
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self {
            max_dirs: DEFAULT_MAX_DIRS,
            max_files_per_dir: DEFAULT_MAX_FILES_PER_DIR,
            max_dir_size: DEFAULT_MAX_DIR_SIZE,
        }
    }
}

/// In-memory model of every directory and file believed to exist
pub struct NamespaceModel {
    dirs: IndexMap<String, Directory>,
    synced: IndexSet<String>,
    pending: IndexSet<String>,
    limits: ModelLimits,
    names: NamePool,
    rng: StdRng,
    evicted: u64,
}

impl NamespaceModel {
    /// Empty model with random names
    pub fn new(limits: ModelLimits) -> Self {
        Self::with_parts(limits, NamePool::random(), StdRng::from_entropy())
    }

    /// Empty model with explicit name source and randomness
    pub fn with_parts(limits: ModelLimits, names: NamePool, rng: StdRng) -> Self {
        Self {
            dirs: IndexMap::new(),
            synced: IndexSet::new(),
            pending: IndexSet::new(),
            limits,
            names,
            rng,
            evicted: 0,
        }
    }

    pub fn limits(&self) -> &ModelLimits {
        &self.limits
    }

    /// Randomness shared with the job generator
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// No directories at all, synced or pending
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Number of live directories
    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn synced_count(&self) -> usize {
        self.synced.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Directories evicted so far
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    /// Whether another pending directory may be appended
    pub fn has_room(&self) -> bool {
        self.dirs.len() < self.limits.max_dirs
    }

    /// Allocate a fresh name
    pub fn next_name(&mut self) -> String {
        self.names.next_name(&mut self.rng)
    }

    /// Add a new pending directory and return its name
    pub fn append_directory(&mut self) -> String {
        loop {
            let name = self.next_name();
            if !self.dirs.contains_key(&name) {
                self.dirs.insert(name.clone(), Directory::new(name.clone()));
                self.pending.insert(name.clone());
                return name;
            }
        }
    }

    pub fn directory(&self, name: &str) -> Option<&Directory> {
        self.dirs.get(name)
    }

    pub fn directory_mut(&mut self, name: &str) -> Option<&mut Directory> {
        self.dirs.get_mut(name)
    }

    pub fn directories(&self) -> impl Iterator<Item = &Directory> {
        self.dirs.values()
    }

    /// Drop a directory from every index
    ///
    /// Idempotent: returns `false` when the name is not live.
    pub fn remove_directory(&mut self, name: &str) -> bool {
        let removed = self.dirs.swap_remove(name).is_some();
        self.synced.swap_remove(name);
        self.pending.swap_remove(name);
        removed
    }

    /// Same as [`remove_directory`](Self::remove_directory), counted as an eviction
    pub fn evict_directory(&mut self, name: &str) -> bool {
        let removed = self.remove_directory(name);
        if removed {
            self.evicted += 1;
            debug!(dir = %name, "Directory evicted from model");
        }
        removed
    }

    /// Uniformly random confirmed directory
    pub fn random_synced_directory(&mut self) -> Option<String> {
        Self::pick(&self.synced, &mut self.rng)
    }

    /// Uniformly random unconfirmed directory
    pub fn random_unsynced_directory(&mut self) -> Option<String> {
        Self::pick(&self.pending, &mut self.rng)
    }

    fn pick(set: &IndexSet<String>, rng: &mut StdRng) -> Option<String> {
        if set.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..set.len());
        set.get_index(idx).cloned()
    }

    /// Confirm mkdir of a directory
    ///
    /// Returns `false` if the directory is no longer live.
    pub fn mark_directory_synced(&mut self, name: &str, entry_size: u64, at: DateTime<Utc>) -> bool {
        let Some(dir) = self.dirs.get_mut(name) else {
            return false;
        };
        dir.on_disk = true;
        dir.entry_size = entry_size;
        dir.creation_time = Some(at);
        self.pending.swap_remove(name);
        self.synced.insert(name.to_string());
        true
    }

    /// Allocate a new file in a directory
    ///
    /// Returns `None` if the directory is unknown, or if it is already at the
    /// files threshold, in which case it is evicted.
    pub fn touch(&mut self, dir: &str) -> Option<String> {
        let count = self.dirs.get(dir)?.file_count();
        if count >= self.limits.max_files_per_dir {
            self.evict_directory(dir);
            return None;
        }
        loop {
            let name = self.next_name();
            let entry = self.dirs.get_mut(dir)?;
            if entry.touch(&name) {
                return Some(name);
            }
        }
    }

    /// Uniformly random on-disk file of a directory
    pub fn random_synced_file(&mut self, dir: &str) -> Option<String> {
        let entry = self.dirs.get(dir)?;
        entry
            .random_synced_file(&mut self.rng)
            .map(|file| file.name.clone())
    }

    /// Whether a directory crossed either threshold
    pub fn exceeds_limits(&self, dir: &str) -> bool {
        self.dirs.get(dir).is_some_and(|d| {
            d.file_count() >= self.limits.max_files_per_dir
                || d.entry_size >= self.limits.max_dir_size
        })
    }

    /// Evict a directory if it crossed a threshold
    pub fn evict_if_over_limits(&mut self, dir: &str) -> bool {
        if self.exceeds_limits(dir) {
            self.evict_directory(dir)
        } else {
            false
        }
    }

    /// Total file records across live directories
    pub fn file_count(&self) -> usize {
        self.dirs.values().map(Directory::file_count).sum()
    }
}
