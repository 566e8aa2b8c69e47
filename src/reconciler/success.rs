//! Applying successful results to the model

use super::{TargetPath, Verdict};
use crate::generator::Job;
use crate::model::NamespaceModel;
use crate::protocol::{Action, ResultMessage};

/// Apply a success result
pub(super) fn apply(model: &mut NamespaceModel, job: Option<&Job>, result: &ResultMessage) -> Verdict {
    let Some(target) = TargetPath::parse(&result.target) else {
        return Verdict::Untracked;
    };

    match result.action {
        Action::Mkdir => mkdir(model, target, result),
        Action::Touch => touch(model, target, result),
        Action::List => match model.directory(target.dir) {
            Some(_) => Verdict::Applied,
            None => Verdict::Untracked,
        },
        action => {
            if let Some(verdict) = check_file_live(model, target, result) {
                return verdict;
            }
            match action {
                Action::Stat => Verdict::Applied,
                Action::Read => read(model, target, job, result),
                Action::Write => write(model, target, result),
                Action::Truncate => truncate(model, target, job, result),
                Action::Delete => delete(model, target, result),
                Action::Rename => rename(model, target, job, result),
                Action::RenameExist => rename_exist(model, target, job, result),
                Action::Mkdir | Action::Touch | Action::List => Verdict::Applied,
            }
        }
    }
}

/// A file operation can only succeed on a file that is on disk
///
/// `None` when the file is live and the handler should run.
fn check_file_live(
    model: &NamespaceModel,
    target: TargetPath<'_>,
    result: &ResultMessage,
) -> Option<Verdict> {
    let Some(file) = target.file_in(model) else {
        return Some(Verdict::Untracked);
    };
    if file.on_disk {
        return None;
    }
    match file.deleted_at {
        Some(deleted) if result.timestamp > deleted => Some(Verdict::DeletedFileAccessed),
        _ => Some(Verdict::Race),
    }
}

fn mkdir(model: &mut NamespaceModel, target: TargetPath<'_>, result: &ResultMessage) -> Verdict {
    let entry_size = result.data.dirsize.unwrap_or(0);
    if model.mark_directory_synced(target.dir, entry_size, result.timestamp) {
        model.evict_if_over_limits(target.dir);
        Verdict::Applied
    } else {
        Verdict::Untracked
    }
}

fn touch(model: &mut NamespaceModel, target: TargetPath<'_>, result: &ResultMessage) -> Verdict {
    let Some(name) = target.file else {
        return Verdict::Untracked;
    };
    let Some(dir) = model.directory_mut(target.dir) else {
        return Verdict::Untracked;
    };
    if !dir.mark_file_created(name, result.timestamp) {
        return Verdict::Untracked;
    }
    dir.entry_size += 1;
    model.evict_if_over_limits(target.dir);
    Verdict::Applied
}

fn read(
    model: &NamespaceModel,
    target: TargetPath<'_>,
    job: Option<&Job>,
    result: &ResultMessage,
) -> Verdict {
    let expected = job.and_then(|j| j.payload.data.hash.as_deref());
    let (Some(expected), Some(actual)) = (expected, result.data.hash.as_deref()) else {
        return Verdict::Applied;
    };
    if expected == actual {
        return Verdict::Applied;
    }
    // A mutation issued after this read may have landed before it
    match target.file_in(model) {
        Some(file) if file.has_pending_mutation() => Verdict::Race,
        _ => Verdict::Corruption,
    }
}

fn write(model: &mut NamespaceModel, target: TargetPath<'_>, result: &ResultMessage) -> Verdict {
    let (Some(offset), Some(pattern)) = (result.data.offset, result.data.pattern) else {
        return Verdict::Unexpected;
    };
    let hash = result.data.hash.clone().unwrap_or_else(|| pattern.hash());
    let Some(file) = target.file_in_mut(model) else {
        return Verdict::Untracked;
    };
    file.record_write(offset, pattern, hash, result.timestamp);

    if result.data.bad_hash.is_some() {
        file.data_pattern_hash = None;
        return Verdict::Corruption;
    }
    Verdict::Applied
}

fn truncate(
    model: &mut NamespaceModel,
    target: TargetPath<'_>,
    job: Option<&Job>,
    result: &ResultMessage,
) -> Verdict {
    let size = result
        .data
        .size
        .or_else(|| job.and_then(|j| j.payload.data.size));
    let Some(size) = size else {
        return Verdict::Unexpected;
    };
    match target.file_in_mut(model) {
        Some(file) => {
            file.record_truncate(size, result.timestamp);
            Verdict::Applied
        }
        None => Verdict::Untracked,
    }
}

fn delete(model: &mut NamespaceModel, target: TargetPath<'_>, result: &ResultMessage) -> Verdict {
    let (Some(dir), Some(name)) = (model.directory_mut(target.dir), target.file) else {
        return Verdict::Untracked;
    };
    if dir.mark_file_deleted(name, result.timestamp) {
        Verdict::Applied
    } else {
        Verdict::Untracked
    }
}

/// Destination path of a rename, from the result or the job
pub(super) fn rename_dest<'a>(job: Option<&'a Job>, result: &'a ResultMessage) -> Option<&'a str> {
    result
        .data
        .rename_dest
        .as_deref()
        .or_else(|| job.and_then(|j| j.payload.data.rename_dest.as_deref()))
}

fn rename(
    model: &mut NamespaceModel,
    target: TargetPath<'_>,
    job: Option<&Job>,
    result: &ResultMessage,
) -> Verdict {
    let Some(dest) = rename_dest(job, result).and_then(TargetPath::parse) else {
        return Verdict::Unexpected;
    };
    let (Some(old), Some(new)) = (target.file, dest.file) else {
        return Verdict::Unexpected;
    };
    if dest.dir != target.dir {
        return Verdict::Unexpected;
    }
    let renamed = model
        .directory_mut(target.dir)
        .map(|dir| dir.rename_file(old, new, result.timestamp));
    match renamed {
        Some(true) => Verdict::Applied,
        _ => Verdict::Untracked,
    }
}

fn rename_exist(
    model: &mut NamespaceModel,
    target: TargetPath<'_>,
    job: Option<&Job>,
    result: &ResultMessage,
) -> Verdict {
    let Some(dest) = rename_dest(job, result).and_then(TargetPath::parse) else {
        return Verdict::Unexpected;
    };
    let (Some(source_name), Some(dest_name)) = (target.file, dest.file) else {
        return Verdict::Unexpected;
    };
    let Some(source) = target.file_in(model).cloned() else {
        return Verdict::Untracked;
    };

    let dest_tid = result
        .data
        .dest_tid
        .or_else(|| job.and_then(|j| j.payload.data.dest_tid));
    let adopted = model
        .directory_mut(dest.dir)
        .is_some_and(|dir| dir.adopt_file(dest_name, &source, result.timestamp));
    if adopted {
        if let (Some(file), Some(tid)) = (dest.file_in_mut(model), dest_tid) {
            // A newer job on the destination already reconciled: ordering is unknown
            if file.is_stale(tid) {
                file.invalidate_content();
            } else {
                file.observe_tid(tid);
            }
        }
    }
    match model.directory_mut(target.dir) {
        Some(dir) => {
            dir.mark_file_deleted(source_name, result.timestamp);
            Verdict::Applied
        }
        None => Verdict::Untracked,
    }
}

#[cfg(test)]
mod tests {
    use super::super::ResponseReconciler;
    use super::*;
    use crate::content::DataPattern;
    use crate::model::{ModelLimits, NamePool};
    use crate::protocol::{JobData, JobPayload, ResultData};
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model_with(limits: ModelLimits) -> NamespaceModel {
        NamespaceModel::with_parts(limits, NamePool::random(), StdRng::seed_from_u64(5))
    }

    fn synced_dir(model: &mut NamespaceModel) -> String {
        let dir = model.append_directory();
        model.mark_directory_synced(&dir, 0, Utc::now() - Duration::seconds(60));
        dir
    }

    fn live_file(model: &mut NamespaceModel, dir: &str) -> String {
        let name = model.touch(dir).unwrap();
        model
            .directory_mut(dir)
            .unwrap()
            .mark_file_created(&name, Utc::now() - Duration::seconds(30));
        name
    }

    #[test]
    fn test_mkdir_success_syncs() {
        let mut model = model_with(ModelLimits::default());
        let dir = model.append_directory();
        let mut reconciler = ResponseReconciler::new();

        let data = ResultData {
            dirsize: Some(0),
            ..Default::default()
        };
        let result = ResultMessage::success(Action::Mkdir, format!("/{}", dir), data);
        assert_eq!(reconciler.reconcile(&mut model, None, &result), Verdict::Applied);

        let d = model.directory(&dir).unwrap();
        assert!(d.on_disk);
        assert_eq!(d.entry_size, 0);
        assert_eq!(d.creation_time, Some(result.timestamp));
        assert_eq!(model.synced_count(), 1);
    }

    #[test]
    fn test_mkdir_success_for_evicted_dir() {
        let mut model = model_with(ModelLimits::default());
        let mut reconciler = ResponseReconciler::new();
        let result = ResultMessage::success(Action::Mkdir, "/gone", ResultData::default());
        assert_eq!(reconciler.reconcile(&mut model, None, &result), Verdict::Untracked);
        assert_eq!(model.synced_count(), 0);
    }

    #[test]
    fn test_touch_success_creates_file() {
        let mut model = model_with(ModelLimits::default());
        let dir = synced_dir(&mut model);
        let name = model.touch(&dir).unwrap();
        let mut reconciler = ResponseReconciler::new();

        let result = ResultMessage::success(
            Action::Touch,
            format!("/{}/{}", dir, name),
            ResultData::default(),
        );
        assert_eq!(reconciler.reconcile(&mut model, None, &result), Verdict::Applied);

        let d = model.directory(&dir).unwrap();
        assert_eq!(d.entry_size, 1);
        let f = d.file(&name).unwrap();
        assert!(f.on_disk);
        assert_eq!(f.creation_time, Some(result.timestamp));
    }

    #[test]
    fn test_touch_success_evicts_over_entry_size() {
        let mut model = model_with(ModelLimits {
            max_dir_size: 1,
            ..Default::default()
        });
        let dir = synced_dir(&mut model);
        let name = model.touch(&dir).unwrap();
        let mut reconciler = ResponseReconciler::new();

        let result = ResultMessage::success(
            Action::Touch,
            format!("/{}/{}", dir, name),
            ResultData::default(),
        );
        reconciler.reconcile(&mut model, None, &result);
        assert!(model.directory(&dir).is_none());
        assert_eq!(model.synced_count(), 0);
    }

    #[test]
    fn test_write_success_updates_pattern() {
        let mut model = model_with(ModelLimits::default());
        let dir = synced_dir(&mut model);
        let name = live_file(&mut model, &dir);
        let mut reconciler = ResponseReconciler::new();

        let pattern = DataPattern::new('E', 65);
        let data = ResultData {
            offset: Some(4096),
            length: Some(65),
            pattern: Some(pattern),
            hash: Some(pattern.hash()),
            ..Default::default()
        };
        let result = ResultMessage::success(Action::Write, format!("/{}/{}", dir, name), data);
        assert_eq!(reconciler.reconcile(&mut model, None, &result), Verdict::Applied);

        let f = model.directory(&dir).unwrap().file(&name).unwrap();
        assert_eq!(f.size, 4096 + 65);
        assert_eq!(f.data_pattern, Some(pattern));
        assert_eq!(f.data_pattern_hash, Some(pattern.hash()));
        assert_eq!(f.modify_time, Some(result.timestamp));
    }

    #[test]
    fn test_write_bad_hash_is_corruption() {
        let mut model = model_with(ModelLimits::default());
        let dir = synced_dir(&mut model);
        let name = live_file(&mut model, &dir);
        let mut reconciler = ResponseReconciler::new();

        let data = ResultData {
            offset: Some(0),
            pattern: Some(DataPattern::new('A', 1)),
            bad_hash: Some("deadbeef".into()),
            ..Default::default()
        };
        let result = ResultMessage::success(Action::Write, format!("/{}/{}", dir, name), data);
        assert_eq!(reconciler.reconcile(&mut model, None, &result), Verdict::Corruption);
        assert_eq!(reconciler.anomaly_count(), 1);
    }

    #[test]
    fn test_read_mismatch_is_corruption() {
        let mut model = model_with(ModelLimits::default());
        let dir = synced_dir(&mut model);
        let name = live_file(&mut model, &dir);
        let target = format!("/{}/{}", dir, name);
        let mut reconciler = ResponseReconciler::new();

        let mut data = JobData::new(target.clone());
        data.hash = Some("expected".into());
        let job = Job::new(JobPayload {
            action: Action::Read,
            data,
        });

        let ok = ResultMessage::success(
            Action::Read,
            target.clone(),
            ResultData {
                hash: Some("expected".into()),
                ..Default::default()
            },
        );
        assert_eq!(reconciler.reconcile(&mut model, Some(&job), &ok), Verdict::Applied);

        let bad = ResultMessage::success(
            Action::Read,
            target,
            ResultData {
                hash: Some("different".into()),
                ..Default::default()
            },
        );
        assert_eq!(reconciler.reconcile(&mut model, Some(&job), &bad), Verdict::Corruption);
    }

    #[test]
    fn test_delete_keeps_record() {
        let mut model = model_with(ModelLimits::default());
        let dir = synced_dir(&mut model);
        let name = live_file(&mut model, &dir);
        let mut reconciler = ResponseReconciler::new();

        let result = ResultMessage::success(
            Action::Delete,
            format!("/{}/{}", dir, name),
            ResultData::default(),
        );
        assert_eq!(reconciler.reconcile(&mut model, None, &result), Verdict::Applied);

        let f = model.directory(&dir).unwrap().file(&name).unwrap();
        assert!(!f.on_disk);
        assert_eq!(f.deleted_at, Some(result.timestamp));
    }

    #[test]
    fn test_success_after_delete_is_anomaly() {
        let mut model = model_with(ModelLimits::default());
        let dir = synced_dir(&mut model);
        let name = live_file(&mut model, &dir);
        let target = format!("/{}/{}", dir, name);
        let deleted_at = Utc::now();
        model
            .directory_mut(&dir)
            .unwrap()
            .mark_file_deleted(&name, deleted_at);
        let mut reconciler = ResponseReconciler::new();

        let before = ResultMessage::success(Action::Stat, target.clone(), ResultData::default())
            .at(deleted_at - Duration::seconds(1));
        assert_eq!(reconciler.reconcile(&mut model, None, &before), Verdict::Race);

        let after = ResultMessage::success(Action::Stat, target, ResultData::default())
            .at(deleted_at + Duration::seconds(1));
        assert_eq!(
            reconciler.reconcile(&mut model, None, &after),
            Verdict::DeletedFileAccessed
        );
    }

    #[test]
    fn test_rename_success_renames_record() {
        let mut model = model_with(ModelLimits::default());
        let dir = synced_dir(&mut model);
        let name = live_file(&mut model, &dir);
        let mut reconciler = ResponseReconciler::new();

        let data = ResultData {
            rename_source: Some(format!("/{}/{}", dir, name)),
            rename_dest: Some(format!("/{}/renamed", dir)),
            ..Default::default()
        };
        let result = ResultMessage::success(Action::Rename, format!("/{}/{}", dir, name), data);
        assert_eq!(reconciler.reconcile(&mut model, None, &result), Verdict::Applied);

        let d = model.directory(&dir).unwrap();
        assert!(d.file(&name).is_none());
        assert!(d.file("renamed").unwrap().on_disk);
    }

    #[test]
    fn test_rename_exist_replaces_destination() {
        let mut model = model_with(ModelLimits::default());
        let dir = synced_dir(&mut model);
        let src = live_file(&mut model, &dir);
        let dst = live_file(&mut model, &dir);
        model.directory_mut(&dir).unwrap().file_mut(&src).unwrap().size = 777;
        let mut reconciler = ResponseReconciler::new();

        let data = ResultData {
            rename_source: Some(format!("/{}/{}", dir, src)),
            rename_dest: Some(format!("/{}/{}", dir, dst)),
            ..Default::default()
        };
        let result =
            ResultMessage::success(Action::RenameExist, format!("/{}/{}", dir, src), data);
        assert_eq!(reconciler.reconcile(&mut model, None, &result), Verdict::Applied);

        let d = model.directory(&dir).unwrap();
        assert!(!d.file(&src).unwrap().on_disk);
        assert_eq!(d.file(&dst).unwrap().size, 777);
        assert!(d.file(&dst).unwrap().on_disk);
    }

    #[test]
    fn test_truncate_uses_job_size_fallback() {
        let mut model = model_with(ModelLimits::default());
        let dir = synced_dir(&mut model);
        let name = live_file(&mut model, &dir);
        let target = format!("/{}/{}", dir, name);
        let mut reconciler = ResponseReconciler::new();

        let mut data = JobData::new(target.clone());
        data.size = Some(12);
        let job = Job::new(JobPayload {
            action: Action::Truncate,
            data,
        });
        let result = ResultMessage::success(Action::Truncate, target, ResultData::default());
        assert_eq!(reconciler.reconcile(&mut model, Some(&job), &result), Verdict::Applied);
        assert_eq!(model.directory(&dir).unwrap().file(&name).unwrap().size, 12);
    }
}
