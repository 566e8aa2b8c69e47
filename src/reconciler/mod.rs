//! Response reconciliation
//!
//! Every `job_done` result is checked against the namespace model:
//! - results older than the file's reconciled state are discarded
//! - successes move the model forward
//! - failures are classified as benign, a timing race, or an anomaly
//!
//! Anomalies are what the harness exists to find: a file reported missing
//! after its creation was confirmed, content that does not hash to what was
//! written, operations succeeding on files already deleted, and any failure
//! nobody anticipated.

mod failure;
mod success;

use crate::generator::Job;
use crate::model::{File, NamespaceModel};
use crate::protocol::{Action, ErrorKind, ResultMessage};
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, error, info};

/// Anomalies kept for the end-of-run report
const MAX_RECORDED_ANOMALIES: usize = 1000;

/// Outcome of reconciling one result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Success applied to the model
    Applied,
    /// Result older than the file's reconciled state
    Stale { result_tid: u64, current_tid: u64 },
    /// Target is not (or no longer) in the model
    Untracked,
    /// Known-harmless failure
    Benign(ErrorKind),
    /// Directory hit a size limit and was evicted
    Evicted,
    /// ENOENT for something the model also believes absent
    VerifiedAbsent,
    /// ENOENT or success that predates the model's latest change
    Race,
    /// ENOENT for something confirmed on disk before the failure
    ValidationFailed,
    /// Data read back differs from what was written
    Corruption,
    /// Operation succeeded on a file whose deletion was confirmed earlier
    DeletedFileAccessed,
    /// Failure nobody classified
    Unexpected,
}

impl Verdict {
    /// Whether this points at a bug in the storage under test
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            Verdict::ValidationFailed
                | Verdict::Corruption
                | Verdict::DeletedFileAccessed
                | Verdict::Unexpected
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Applied => f.write_str("applied"),
            Verdict::Stale {
                result_tid,
                current_tid,
            } => write!(f, "stale (tid {} < {})", result_tid, current_tid),
            Verdict::Untracked => f.write_str("untracked"),
            Verdict::Benign(kind) => write!(f, "benign ({:?})", kind),
            Verdict::Evicted => f.write_str("evicted"),
            Verdict::VerifiedAbsent => f.write_str("verified absent"),
            Verdict::Race => f.write_str("race"),
            Verdict::ValidationFailed => f.write_str("validation failed"),
            Verdict::Corruption => f.write_str("corruption"),
            Verdict::DeletedFileAccessed => f.write_str("deleted file accessed"),
            Verdict::Unexpected => f.write_str("failed unexpectedly"),
        }
    }
}

/// A recorded anomaly
#[derive(Debug, Clone)]
pub struct Anomaly {
    pub verdict: Verdict,
    pub action: Action,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

/// `/dir` or `/dir/file`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TargetPath<'a> {
    pub dir: &'a str,
    pub file: Option<&'a str>,
}

impl<'a> TargetPath<'a> {
    pub fn parse(target: &'a str) -> Option<Self> {
        let trimmed = target.trim_start_matches('/');
        let mut parts = trimmed.splitn(2, '/');
        let dir = parts.next().filter(|d| !d.is_empty())?;
        let file = parts.next().filter(|f| !f.is_empty());
        Some(Self { dir, file })
    }

    pub fn file_in<'m>(&self, model: &'m NamespaceModel) -> Option<&'m File> {
        model.directory(self.dir)?.file(self.file?)
    }

    pub fn file_in_mut<'m>(&self, model: &'m mut NamespaceModel) -> Option<&'m mut File> {
        model.directory_mut(self.dir)?.file_mut(self.file?)
    }
}

/// Applies worker results to the namespace model
#[derive(Debug, Default)]
pub struct ResponseReconciler {
    anomalies: Vec<Anomaly>,
    anomaly_count: u64,
}

impl ResponseReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total anomalies seen
    pub fn anomaly_count(&self) -> u64 {
        self.anomaly_count
    }

    /// The first anomalies seen, for reporting
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// Reconcile one result
    ///
    /// `job` is the controller's copy of the job when it is still known; a
    /// late result for a job that was already requeued is reconciled from
    /// its own fields.
    pub fn reconcile(
        &mut self,
        model: &mut NamespaceModel,
        job: Option<&Job>,
        result: &ResultMessage,
    ) -> Verdict {
        let target = TargetPath::parse(&result.target);

        if result.action.mutates_content() {
            if let Some(file) = target.and_then(|t| t.file_in_mut(model)) {
                file.end_mutation();
            }
        }
        if result.action == Action::RenameExist {
            let dest = success::rename_dest(job, result).and_then(TargetPath::parse);
            if let Some(file) = dest.and_then(|d| d.file_in_mut(model)) {
                file.end_mutation();
            }
        }

        let verdict = match self.check_stale(model, target, result) {
            Some(stale) => stale,
            None if result.is_success() => success::apply(model, job, result),
            None => failure::classify(model, result),
        };

        self.report(verdict, result);
        verdict
    }

    /// Discard results older than the file's reconciled state
    fn check_stale(
        &self,
        model: &mut NamespaceModel,
        target: Option<TargetPath<'_>>,
        result: &ResultMessage,
    ) -> Option<Verdict> {
        if !result.action.targets_file() {
            return None;
        }
        let tid = result.data.tid?;
        let file = target?.file_in_mut(model)?;
        if file.is_stale(tid) {
            // The mutation landed at an unknown point relative to newer jobs
            if result.is_success() && result.action.mutates_content() {
                file.invalidate_content();
            }
            return Some(Verdict::Stale {
                result_tid: tid,
                current_tid: file.tid,
            });
        }
        file.observe_tid(tid);
        None
    }

    fn report(&mut self, verdict: Verdict, result: &ResultMessage) {
        let action = result.action;
        let target = result.target.as_str();
        let ts = crate::protocol::timestamp::format(&result.timestamp);

        match verdict {
            Verdict::Applied => {
                debug!(action = %action, path = target, "Result applied")
            }
            Verdict::Stale { .. }
            | Verdict::Untracked
            | Verdict::Benign(_)
            | Verdict::Race => {
                debug!(action = %action, path = target, verdict = %verdict, "Result ignored")
            }
            Verdict::VerifiedAbsent => {
                debug!(action = %action, path = target, "Result verified OK, target not on disk")
            }
            Verdict::Evicted => {
                info!(action = %action, path = target, "Directory hit size limit, evicted")
            }
            Verdict::ValidationFailed => {
                error!(action = %action, path = target, timestamp = %ts, "Result Verify FAILED: target confirmed on disk but reported missing")
            }
            Verdict::Corruption => {
                error!(action = %action, path = target, timestamp = %ts, "Data corruption: content does not match written pattern")
            }
            Verdict::DeletedFileAccessed => {
                error!(action = %action, path = target, timestamp = %ts, "Operation succeeded on a file already deleted")
            }
            Verdict::Unexpected => {
                error!(
                    action = %action,
                    path = target,
                    timestamp = %ts,
                    code = ?result.error_code,
                    message = result.error_message.as_deref().unwrap_or(""),
                    line = ?result.linenum,
                    "Operation FAILED UNEXPECTEDLY"
                )
            }
        }

        if verdict.is_anomaly() {
            self.anomaly_count += 1;
            if self.anomalies.len() < MAX_RECORDED_ANOMALIES {
                self.anomalies.push(Anomaly {
                    verdict,
                    action,
                    target: result.target.clone(),
                    timestamp: result.timestamp,
                    detail: result.error_message.clone().unwrap_or_default(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::DataPattern;
    use crate::generator::{ActionWeights, JobGenerator};
    use crate::model::{ModelLimits, NamePool};
    use crate::protocol::{JobData, JobPayload, ResultData};
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const EIO: i32 = 5;

    fn model() -> NamespaceModel {
        NamespaceModel::with_parts(
            ModelLimits::default(),
            NamePool::random(),
            StdRng::seed_from_u64(17),
        )
    }

    fn synced_dir(model: &mut NamespaceModel) -> String {
        let dir = model.append_directory();
        model.mark_directory_synced(&dir, 0, Utc::now() - Duration::seconds(60));
        dir
    }

    /// A live file whose last write hashed to `hash`
    fn written_file(model: &mut NamespaceModel, dir: &str, hash: &str) -> String {
        let name = model.touch(dir).unwrap();
        let entry = model.directory_mut(dir).unwrap();
        entry.mark_file_created(&name, Utc::now() - Duration::seconds(30));
        entry.file_mut(&name).unwrap().record_write(
            0,
            DataPattern::new('A', 64),
            hash.to_string(),
            Utc::now() - Duration::seconds(20),
        );
        name
    }

    fn file<'m>(model: &'m mut NamespaceModel, path: &str) -> &'m mut File {
        TargetPath::parse(path).unwrap().file_in_mut(model).unwrap()
    }

    /// Read job issued the way the generator issues one
    fn read_job(model: &mut NamespaceModel, path: &str) -> Job {
        let f = file(model, path);
        let mut data = JobData::new(path);
        data.tid = Some(f.allocate_tid());
        data.uuid = Some(f.uuid);
        data.hash = f.expected_read().map(|(_, _, hash)| hash.to_string());
        Job::new(JobPayload {
            action: Action::Read,
            data,
        })
    }

    fn write_job(model: &mut NamespaceModel, path: &str) -> Job {
        let f = file(model, path);
        let mut data = JobData::new(path);
        data.tid = Some(f.allocate_tid());
        f.begin_mutation();
        Job::new(JobPayload {
            action: Action::Write,
            data,
        })
    }

    fn read_result(job: &Job, hash: &str) -> ResultMessage {
        let data = ResultData {
            hash: Some(hash.to_string()),
            ..ResultData::echo(&job.payload.data)
        };
        ResultMessage::success(Action::Read, job.target(), data)
    }

    fn write_result(job: &Job, pattern: DataPattern) -> ResultMessage {
        let data = ResultData {
            offset: Some(0),
            length: Some(pattern.len()),
            pattern: Some(pattern),
            hash: Some(pattern.hash()),
            ..ResultData::echo(&job.payload.data)
        };
        ResultMessage::success(Action::Write, job.target(), data)
    }

    fn next_of(gen: &mut JobGenerator, model: &mut NamespaceModel, action: Action) -> Job {
        (0..100)
            .map(|_| gen.next_job(model))
            .find(|job| job.action() == action)
            .unwrap()
    }

    #[test]
    fn test_read_older_than_replacing_rename_is_stale() {
        let mut m = model();
        let dir = synced_dir(&mut m);
        let a = written_file(&mut m, &dir, "hash-a");
        let b = written_file(&mut m, &dir, "hash-b");
        let paths = [format!("/{}/{}", dir, a), format!("/{}/{}", dir, b)];

        // Reads of both files go out before the rename
        let reads: Vec<Job> = paths.iter().map(|p| read_job(&mut m, p)).collect();

        let weights = ActionWeights::new([(Action::RenameExist, 100)]).unwrap();
        let mut gen = JobGenerator::new(&weights);
        let rename = next_of(&mut gen, &mut m, Action::RenameExist);
        let source = rename.payload.data.rename_source.clone().unwrap();
        let dest = rename.payload.data.rename_dest.clone().unwrap();
        assert!(rename.payload.data.dest_tid.is_some());

        // Reads issued while the rename is in flight carry no expectation
        let during = read_job(&mut m, &dest);
        assert!(during.payload.data.hash.is_none());

        let mut reconciler = ResponseReconciler::new();
        let done = ResultMessage::success(
            Action::RenameExist,
            rename.target(),
            ResultData::echo(&rename.payload.data),
        );
        assert_eq!(reconciler.reconcile(&mut m, Some(&rename), &done), Verdict::Applied);
        assert!(!file(&mut m, &dest).has_pending_mutation());

        // The destination now holds the source's content
        let source_hash = if source == paths[0] { "hash-a" } else { "hash-b" };
        let old_read = reads.iter().find(|r| r.target() == dest).unwrap();
        let verdict = reconciler.reconcile(&mut m, Some(old_read), &read_result(old_read, source_hash));
        assert!(matches!(verdict, Verdict::Stale { .. }));

        assert_eq!(
            reconciler.reconcile(&mut m, Some(&during), &read_result(&during, source_hash)),
            Verdict::Applied
        );

        let fresh = read_job(&mut m, &dest);
        assert_eq!(fresh.payload.data.hash.as_deref(), Some(source_hash));
        assert_eq!(
            reconciler.reconcile(&mut m, Some(&fresh), &read_result(&fresh, source_hash)),
            Verdict::Applied
        );
        assert_eq!(reconciler.anomaly_count(), 0);
    }

    #[test]
    fn test_stale_write_success_clears_expected_content() {
        let mut m = model();
        let dir = synced_dir(&mut m);
        let name = written_file(&mut m, &dir, "hash-0");
        let path = format!("/{}/{}", dir, name);

        let first = write_job(&mut m, &path);
        let second = write_job(&mut m, &path);
        let mut reconciler = ResponseReconciler::new();

        let newer = DataPattern::new('B', 128);
        assert_eq!(
            reconciler.reconcile(&mut m, Some(&second), &write_result(&second, newer)),
            Verdict::Applied
        );

        // The older write landed at an unknown point: its content may be on disk
        let older = DataPattern::new('C', 32);
        let verdict = reconciler.reconcile(&mut m, Some(&first), &write_result(&first, older));
        assert!(matches!(verdict, Verdict::Stale { .. }));
        assert!(file(&mut m, &path).expected_read().is_none());

        let weights = ActionWeights::new([(Action::Read, 100)]).unwrap();
        let mut gen = JobGenerator::new(&weights);
        let read = next_of(&mut gen, &mut m, Action::Read);
        assert_eq!(read.target(), path);
        assert!(read.payload.data.hash.is_none());
        assert_eq!(
            reconciler.reconcile(&mut m, Some(&read), &read_result(&read, &older.hash())),
            Verdict::Applied
        );
        assert_eq!(reconciler.anomaly_count(), 0);
    }

    #[test]
    fn test_stale_failed_write_keeps_content() {
        let mut m = model();
        let dir = synced_dir(&mut m);
        let name = written_file(&mut m, &dir, "hash-0");
        let path = format!("/{}/{}", dir, name);

        let first = write_job(&mut m, &path);
        let second = write_job(&mut m, &path);
        let mut reconciler = ResponseReconciler::new();
        let newer = DataPattern::new('D', 16);
        reconciler.reconcile(&mut m, Some(&second), &write_result(&second, newer));

        let failed = ResultMessage::failure(
            Action::Write,
            path.clone(),
            EIO,
            "Input/output error",
            ResultData::echo(&first.payload.data),
        );
        assert!(matches!(
            reconciler.reconcile(&mut m, Some(&first), &failed),
            Verdict::Stale { .. }
        ));
        let hash = newer.hash();
        assert_eq!(file(&mut m, &path).expected_read(), Some((0, 16, hash.as_str())));
    }

    #[test]
    fn test_requeued_job_with_old_tid_is_stale() {
        let mut m = model();
        let dir = synced_dir(&mut m);
        written_file(&mut m, &dir, "hash-0");

        let weights = ActionWeights::new([(Action::Stat, 100)]).unwrap();
        let mut gen = JobGenerator::new(&weights);
        let orphan = gen.next_job(&mut m);
        let later = gen.next_job(&mut m);

        gen.requeue(vec![orphan.clone()]);
        let reissued = gen.next_job(&mut m);
        assert_ne!(reissued.id, orphan.id);
        assert_eq!(reissued.payload.data.tid, orphan.payload.data.tid);

        let mut reconciler = ResponseReconciler::new();
        let done = |job: &Job| {
            ResultMessage::success(Action::Stat, job.target(), ResultData::echo(&job.payload.data))
        };
        assert_eq!(reconciler.reconcile(&mut m, Some(&later), &done(&later)), Verdict::Applied);
        assert_eq!(
            reconciler.reconcile(&mut m, Some(&reissued), &done(&reissued)),
            Verdict::Stale {
                result_tid: 1,
                current_tid: 2
            }
        );
    }
}
