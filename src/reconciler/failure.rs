//! Classifying failed results
//!
//! Each action has its own set of harmless error codes. ENOENT gets a
//! timestamp check against the model; everything not listed is unexpected.

use super::{TargetPath, Verdict};
use crate::model::NamespaceModel;
use crate::protocol::{Action, ErrorKind, ResultMessage};
use chrono::{DateTime, Utc};

/// Error kinds that are expected for an action under concurrency
fn benign_kinds(action: Action) -> &'static [ErrorKind] {
    use ErrorKind::*;
    match action {
        Action::Mkdir => &[NoTarget, AlreadyExists],
        Action::Touch => &[NoTarget, AlreadyExists, StaleHandle],
        Action::List | Action::Stat | Action::Delete => &[NoTarget, StaleHandle],
        Action::Read | Action::Write | Action::Truncate => &[NoTarget, StaleHandle, LockUnavailable],
        Action::Rename => &[NoTarget, StaleHandle, AlreadyExists],
        Action::RenameExist => &[NoTarget, StaleHandle, SameFile],
    }
}

/// Classify a failure result
pub(super) fn classify(model: &mut NamespaceModel, result: &ResultMessage) -> Verdict {
    let kind = result.error_kind();
    let action = result.action;

    if benign_kinds(action).contains(&kind) {
        return Verdict::Benign(kind);
    }

    let target = TargetPath::parse(&result.target);
    match kind {
        ErrorKind::DirSizeLimit if creates_entry(action) => {
            let dir = match action {
                Action::RenameExist | Action::Rename => result
                    .data
                    .rename_dest
                    .as_deref()
                    .and_then(TargetPath::parse)
                    .map(|t| t.dir),
                _ => target.map(|t| t.dir),
            };
            match dir {
                Some(dir) if model.evict_directory(dir) => Verdict::Evicted,
                _ => Verdict::Benign(kind),
            }
        }
        ErrorKind::NotFound => match (action, target) {
            (Action::Mkdir, _) | (_, None) => Verdict::Unexpected,
            (Action::Touch | Action::List, Some(target)) => directory_missing(model, target, result),
            (_, Some(target)) => file_missing(model, target, result),
        },
        ErrorKind::HashMismatch => Verdict::Corruption,
        _ => Verdict::Unexpected,
    }
}

fn creates_entry(action: Action) -> bool {
    matches!(
        action,
        Action::Mkdir | Action::Touch | Action::Rename | Action::RenameExist
    )
}

/// ENOENT where the directory itself is the thing that must exist
fn directory_missing(model: &NamespaceModel, target: TargetPath<'_>, result: &ResultMessage) -> Verdict {
    match model.directory(target.dir) {
        Some(dir) if dir.on_disk => compare_creation(dir.creation_time, result.timestamp),
        _ => Verdict::VerifiedAbsent,
    }
}

/// ENOENT on a file
fn file_missing(model: &NamespaceModel, target: TargetPath<'_>, result: &ResultMessage) -> Verdict {
    match target.file_in(model) {
        Some(file) if file.on_disk => compare_creation(file.creation_time, result.timestamp),
        _ => Verdict::VerifiedAbsent,
    }
}

/// Missing after confirmed creation is a failure; before it is a race
fn compare_creation(created: Option<DateTime<Utc>>, failed_at: DateTime<Utc>) -> Verdict {
    match created {
        Some(created) if failed_at > created => Verdict::ValidationFailed,
        _ => Verdict::Race,
    }
}
