//! Wire messages exchanged between the controller and workers
//!
//! Every message is a single JSON document on its own line.
//!
//! Worker → controller:
//! ```text
//! {"message":"connect"}
//! {"message":"job_done","job_id":"…","result":{"result":"success",…}}
//! {"message":"disconnect"}
//! ```
//!
//! Controller → worker:
//! ```text
//! ["<job_id>", {"action":"write","data":{"target":"/d/f",…}}]
//! ```

use super::action::Action;
use super::codes::ErrorKind;
use super::timestamp;
use crate::content::DataPattern;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Allocate a fresh id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages a worker sends to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Worker is ready for jobs
    Connect,
    /// Worker is leaving; its in-flight jobs must be reissued
    Disconnect,
    /// A job finished, successfully or not
    JobDone { job_id: JobId, result: ResultMessage },
}

/// How a worker should choose the write offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoType {
    /// Append right after the last known pattern
    Sequential,
    /// Pick an offset from the worker's offset table
    Random,
}

/// Parameters of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    /// Path relative to the mount point, e.g. `/dir/file`
    pub target: String,

    /// Session token of the target file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,

    /// Transaction id of the target file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<u64>,

    /// Offset of the last known pattern (read) or the base for sequential writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    /// Length of the last known pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// Expected hash of `[offset, offset + length)`, when it is safe to verify
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_type: Option<IoType>,

    /// New size for truncate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_dest: Option<String>,

    /// Transaction id of the file being replaced by `rename_exist`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_tid: Option<u64>,
}

impl JobData {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }
}

/// A job as sent to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub action: Action,
    pub data: JobData,
}

/// Outbound frame: `[job_id, payload]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFrame(pub JobId, pub JobPayload);

/// Whether a job succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    #[serde(alias = "failed")]
    Failure,
}

/// Action-specific result fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultData {
    /// Directory entry size after mkdir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirsize: Option<u64>,

    /// Session token echoed from the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,

    /// Transaction id echoed from the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<u64>,

    /// Hash of the bytes read, or of the pattern written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    /// Length of the range read or written
    #[serde(default, alias = "chunk_size", skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// Pattern written
    #[serde(default, alias = "data_pattern", skip_serializing_if = "Option::is_none")]
    pub pattern: Option<DataPattern>,

    /// File size after truncate or stat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Number of entries listed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_dest: Option<String>,

    /// Destination transaction id echoed from a `rename_exist` job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_tid: Option<u64>,

    /// Hash actually read back after a write, when it differs from `hash`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_hash: Option<String>,
}

impl ResultData {
    /// Result data echoing the job's identity fields
    pub fn echo(job: &JobData) -> Self {
        Self {
            uuid: job.uuid,
            tid: job.tid,
            rename_source: job.rename_source.clone(),
            rename_dest: job.rename_dest.clone(),
            dest_tid: job.dest_tid,
            ..Default::default()
        }
    }
}

/// Result of one job as reported by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub result: Outcome,
    pub action: Action,
    pub target: String,

    /// When the worker finished the operation
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub data: ResultData,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Worker source line that produced the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linenum: Option<u32>,
}

impl ResultMessage {
    /// Successful result stamped now
    pub fn success(action: Action, target: impl Into<String>, data: ResultData) -> Self {
        Self {
            result: Outcome::Success,
            action,
            target: target.into(),
            timestamp: Utc::now(),
            data,
            error_code: None,
            error_message: None,
            linenum: None,
        }
    }

    /// Failed result stamped now
    pub fn failure(
        action: Action,
        target: impl Into<String>,
        code: i32,
        message: impl Into<String>,
        data: ResultData,
    ) -> Self {
        Self {
            result: Outcome::Failure,
            action,
            target: target.into(),
            timestamp: Utc::now(),
            data,
            error_code: Some(code),
            error_message: Some(message.into()),
            linenum: None,
        }
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.linenum = Some(line);
        self
    }

    pub fn is_success(&self) -> bool {
        self.result == Outcome::Success
    }

    /// Classified failure reason
    pub fn error_kind(&self) -> ErrorKind {
        ErrorKind::classify(self.error_code, self.error_message.as_deref())
    }
}
