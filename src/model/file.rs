//! Expected state of a single file

use crate::content::DataPattern;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// What the controller believes about one file
#[derive(Debug, Clone)]
pub struct File {
    /// Entry name inside its directory
    pub name: String,

    /// Whether a create has been confirmed and no delete confirmed since
    pub on_disk: bool,

    /// When the current name came into existence (touch or rename)
    pub creation_time: Option<DateTime<Utc>>,

    /// Last confirmed write or truncate
    pub modify_time: Option<DateTime<Utc>>,

    /// When a delete (or being renamed over) was confirmed
    pub deleted_at: Option<DateTime<Utc>>,

    /// Size in bytes as far as the controller knows
    pub size: u64,

    /// Last pattern written
    pub data_pattern: Option<DataPattern>,

    /// Hash of the last pattern written, cleared when the range is no longer intact
    pub data_pattern_hash: Option<String>,

    pub data_pattern_offset: u64,
    pub data_pattern_length: u64,

    /// Session token, regenerated on every confirmed mutation
    pub uuid: Uuid,

    /// Highest transaction id reconciled so far
    pub tid: u64,

    /// Last transaction id handed out
    issued_tid: u64,

    /// Writes/truncates issued but not yet reconciled
    pending_mutations: u32,
}

impl File {
    /// A freshly allocated, not yet created file
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_disk: false,
            creation_time: None,
            modify_time: None,
            deleted_at: None,
            size: 0,
            data_pattern: None,
            data_pattern_hash: None,
            data_pattern_offset: 0,
            data_pattern_length: 0,
            uuid: Uuid::new_v4(),
            tid: 0,
            issued_tid: 0,
            pending_mutations: 0,
        }
    }

    /// Hand out the next transaction id for a job on this file
    pub fn allocate_tid(&mut self) -> u64 {
        self.issued_tid = self.issued_tid.max(self.tid) + 1;
        self.issued_tid
    }

    /// A result for `tid` is older than what has already been reconciled
    pub fn is_stale(&self, tid: u64) -> bool {
        tid < self.tid
    }

    /// Record that a result for `tid` was reconciled
    pub fn observe_tid(&mut self, tid: u64) {
        self.tid = self.tid.max(tid);
    }

    pub fn begin_mutation(&mut self) {
        self.pending_mutations += 1;
    }

    pub fn end_mutation(&mut self) {
        self.pending_mutations = self.pending_mutations.saturating_sub(1);
    }

    /// Whether a write or truncate is in flight
    pub fn has_pending_mutation(&self) -> bool {
        self.pending_mutations > 0
    }

    /// End offset of the last pattern written
    pub fn pattern_end(&self) -> u64 {
        self.data_pattern_offset + self.data_pattern_length
    }

    /// Range and hash a read may verify against
    ///
    /// `None` while a mutation is in flight, or when nothing verifiable was written.
    pub fn expected_read(&self) -> Option<(u64, u64, &str)> {
        if self.has_pending_mutation() || self.data_pattern_length == 0 {
            return None;
        }
        self.data_pattern_hash
            .as_deref()
            .map(|hash| (self.data_pattern_offset, self.data_pattern_length, hash))
    }

    /// Forget the expected content after a mutation whose effect is unknown
    pub fn invalidate_content(&mut self) {
        self.data_pattern_hash = None;
    }

    /// Apply a confirmed write
    pub fn record_write(
        &mut self,
        offset: u64,
        pattern: DataPattern,
        hash: String,
        at: DateTime<Utc>,
    ) {
        let length = pattern.len();
        self.data_pattern = Some(pattern);
        self.data_pattern_hash = Some(hash);
        self.data_pattern_offset = offset;
        self.data_pattern_length = length;
        self.size = self.size.max(offset + length);
        self.modify_time = Some(at);
        self.uuid = Uuid::new_v4();
    }

    /// Apply a confirmed truncate
    pub fn record_truncate(&mut self, size: u64, at: DateTime<Utc>) {
        self.size = size;
        if self.pattern_end() > size {
            self.data_pattern_hash = None;
        }
        self.modify_time = Some(at);
        self.uuid = Uuid::new_v4();
    }

    pub(crate) fn record_created(&mut self, at: DateTime<Utc>) {
        self.on_disk = true;
        self.creation_time = Some(at);
        self.deleted_at = None;
    }

    pub(crate) fn record_deleted(&mut self, at: DateTime<Utc>) {
        self.on_disk = false;
        self.deleted_at = Some(at);
        self.uuid = Uuid::new_v4();
    }

    /// Take over content of `source`, as when `source` is renamed onto this file
    pub(crate) fn adopt_content(&mut self, source: &File, at: DateTime<Utc>) {
        self.size = source.size;
        self.data_pattern = source.data_pattern;
        self.data_pattern_hash = source.data_pattern_hash.clone();
        self.data_pattern_offset = source.data_pattern_offset;
        self.data_pattern_length = source.data_pattern_length;
        self.modify_time = source.modify_time;
        self.uuid = Uuid::new_v4();
        self.record_created(at);
    }
}
