//! Expected state of a directory and the files in it

use super::file::File;
use crate::content::name_fingerprint;
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use rand::Rng;

/// A directory the controller created (or asked to create)
#[derive(Debug, Clone)]
pub struct Directory {
    /// Unique opaque name, also the path component under the mount root
    pub name: String,

    /// Whether mkdir has been confirmed
    pub on_disk: bool,

    /// Entry size as tracked by the controller
    pub entry_size: u64,

    pub creation_time: Option<DateTime<Utc>>,

    /// Fingerprint of the name → file
    files: IndexMap<String, File>,

    /// Fingerprints of files currently on disk
    synced_files: IndexSet<String>,
}

impl Directory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_disk: false,
            entry_size: 0,
            creation_time: None,
            files: IndexMap::new(),
            synced_files: IndexSet::new(),
        }
    }

    /// Path relative to the mount root
    pub fn path(&self) -> String {
        format!("/{}", self.name)
    }

    /// Path of a file in this directory
    pub fn file_path(&self, file: &str) -> String {
        format!("/{}/{}", self.name, file)
    }

    /// Number of file records, deleted ones included
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Number of files believed on disk
    pub fn synced_file_count(&self) -> usize {
        self.synced_files.len()
    }

    pub fn files(&self) -> impl Iterator<Item = &File> {
        self.files.values()
    }

    /// Allocate a file record for `name`
    ///
    /// Returns `false` when a record with that name already exists.
    pub fn touch(&mut self, name: &str) -> bool {
        let key = name_fingerprint(name);
        if self.files.contains_key(&key) {
            return false;
        }
        self.files.insert(key, File::new(name));
        true
    }

    pub fn file(&self, name: &str) -> Option<&File> {
        self.files.get(&name_fingerprint(name))
    }

    pub fn file_mut(&mut self, name: &str) -> Option<&mut File> {
        self.files.get_mut(&name_fingerprint(name))
    }

    /// Uniformly random file that is on disk
    pub fn random_synced_file<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&File> {
        if self.synced_files.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.synced_files.len());
        self.synced_files
            .get_index(idx)
            .and_then(|key| self.files.get(key))
    }

    /// Confirm creation of a file
    pub fn mark_file_created(&mut self, name: &str, at: DateTime<Utc>) -> bool {
        let key = name_fingerprint(name);
        match self.files.get_mut(&key) {
            Some(file) => {
                file.record_created(at);
                self.synced_files.insert(key);
                true
            }
            None => false,
        }
    }

    /// Confirm deletion of a file; the record stays
    pub fn mark_file_deleted(&mut self, name: &str, at: DateTime<Utc>) -> bool {
        let key = name_fingerprint(name);
        match self.files.get_mut(&key) {
            Some(file) => {
                file.record_deleted(at);
                self.synced_files.swap_remove(&key);
                true
            }
            None => false,
        }
    }

    /// Rename a file record in place
    ///
    /// The record keeps its content and tid; its creation time becomes `at`.
    /// Returns `false` if `old` is unknown or `new` already has a record.
    pub fn rename_file(&mut self, old: &str, new: &str, at: DateTime<Utc>) -> bool {
        let old_key = name_fingerprint(old);
        let new_key = name_fingerprint(new);
        if self.files.contains_key(&new_key) {
            return false;
        }
        let Some(mut file) = self.files.swap_remove(&old_key) else {
            return false;
        };
        let was_synced = self.synced_files.swap_remove(&old_key);
        file.name = new.to_string();
        file.creation_time = Some(at);
        if was_synced {
            self.synced_files.insert(new_key.clone());
        }
        self.files.insert(new_key, file);
        true
    }

    /// Replace the content of `dest` with `source`, marking `dest` on disk
    pub(crate) fn adopt_file(&mut self, dest: &str, source: &File, at: DateTime<Utc>) -> bool {
        let key = name_fingerprint(dest);
        match self.files.get_mut(&key) {
            Some(file) => {
                file.adopt_content(source, at);
                self.synced_files.insert(key);
                true
            }
            None => false,
        }
    }
}
