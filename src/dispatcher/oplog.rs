//! Per-operation CSV log
//!
//! One row per reconciled result, written by the controller as results come
//! in. Off unless `--op-log` is given.

use super::registry::WorkerId;
use crate::error::Result;
use crate::generator::Job;
use crate::protocol::{timestamp, Action, JobId, ResultMessage};
use crate::reconciler::Verdict;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// One CSV row
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub timestamp: String,
    pub worker: String,
    pub job: String,
    pub action: Action,
    pub target: String,
    pub result: &'static str,
    pub error_code: Option<i32>,
    pub verdict: String,
    /// Dispatch to reconcile, when the job was still tracked
    pub duration_ms: Option<u64>,
}

impl OperationRecord {
    pub fn new(
        worker: &WorkerId,
        job_id: &JobId,
        job: Option<&Job>,
        result: &ResultMessage,
        verdict: Verdict,
    ) -> Self {
        Self {
            timestamp: timestamp::format(&result.timestamp),
            worker: worker.to_string(),
            job: job_id.to_string(),
            action: result.action,
            target: result.target.clone(),
            result: if result.is_success() { "success" } else { "failed" },
            error_code: result.error_code,
            verdict: verdict.to_string(),
            duration_ms: job.map(|j| j.issued.elapsed().as_millis() as u64),
        }
    }
}

/// CSV writer for [`OperationRecord`]s
pub struct OperationLog {
    writer: csv::Writer<File>,
    rows: u64,
}

impl OperationLog {
    /// Create (or truncate) the log at `path`; the header row goes out with the first record
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            writer: csv::Writer::from_path(path)?,
            rows: 0,
        })
    }

    pub fn record(&mut self, record: &OperationRecord) -> Result<()> {
        self.writer.serialize(record)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Rows written so far
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JobData, JobPayload, ResultData};

    #[test]
    fn test_rows_follow_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.csv");
        let mut log = OperationLog::create(&path).unwrap();

        let job = Job::new(JobPayload {
            action: Action::RenameExist,
            data: JobData::new("/d/a"),
        });
        let ok = ResultMessage::success(Action::RenameExist, "/d/a", ResultData::default());
        let worker = WorkerId::new("10.0.0.1:4000#1");
        log.record(&OperationRecord::new(&worker, &job.id, Some(&job), &ok, Verdict::Applied))
            .unwrap();

        let failed = ResultMessage::failure(Action::Stat, "/d/b", 2, "No such file", ResultData::default());
        let other = JobId::generate();
        log.record(&OperationRecord::new(&worker, &other, None, &failed, Verdict::VerifiedAbsent))
            .unwrap();
        log.flush().unwrap();
        assert_eq!(log.rows(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "timestamp,worker,job,action,target,result,error_code,verdict,duration_ms"
        );
        assert!(lines[1].contains(",rename_exist,/d/a,success,,applied,"));
        assert!(lines[1].contains(&job.id.to_string()));
        assert!(lines[2].ends_with(",stat,/d/b,failed,2,verified absent,"));
    }
}
