//! Per-action target selection
//!
//! Each selector picks a valid target from the model and fills in the job
//! data, or returns `None` when the model has nothing suitable right now.

use crate::model::{File, NamespaceModel};
use crate::protocol::{Action, IoType, JobData, JobPayload};
use rand::Rng;

/// Upper bound on how far a truncate may extend a file
const TRUNCATE_GROWTH: u64 = 1024 * 1024;

/// Build a job payload for `action`, or `None` if no target qualifies
pub fn select(action: Action, model: &mut NamespaceModel) -> Option<JobPayload> {
    let data = match action {
        Action::Mkdir => mkdir(model)?,
        Action::Touch => touch(model)?,
        Action::List => list(model)?,
        Action::Stat | Action::Delete => existing_file(model, |_, _| {})?,
        Action::Read => read(model)?,
        Action::Write => write(model)?,
        Action::Truncate => truncate(model)?,
        Action::Rename => rename(model)?,
        Action::RenameExist => rename_exist(model)?,
    };
    Some(JobPayload { action, data })
}

/// mkdir: grow the pending set while there is room, then pick a pending directory
pub fn mkdir(model: &mut NamespaceModel) -> Option<JobData> {
    if model.has_room() {
        model.append_directory();
    }
    let dir = model.random_unsynced_directory()?;
    Some(JobData::new(format!("/{}", dir)))
}

/// mkdir when nothing else had a target
///
/// At the directory cap with every directory confirmed, a confirmed
/// directory is evicted to make room.
pub fn fallback_mkdir(model: &mut NamespaceModel) -> JobData {
    if let Some(data) = mkdir(model) {
        return data;
    }
    if let Some(victim) = model.random_synced_directory() {
        model.evict_directory(&victim);
    }
    let dir = model.append_directory();
    JobData::new(format!("/{}", dir))
}

fn touch(model: &mut NamespaceModel) -> Option<JobData> {
    let dir = model.random_synced_directory()?;
    let name = model.touch(&dir)?;
    let entry = model.directory_mut(&dir)?;
    let path = entry.file_path(&name);
    let file = entry.file_mut(&name)?;
    Some(stamped(path, file))
}

fn list(model: &mut NamespaceModel) -> Option<JobData> {
    let dir = model.random_synced_directory()?;
    Some(JobData::new(format!("/{}", dir)))
}

/// Pick an on-disk file and let `fill` add action-specific fields
fn existing_file(
    model: &mut NamespaceModel,
    fill: impl FnOnce(&mut File, &mut JobData),
) -> Option<JobData> {
    let dir = model.random_synced_directory()?;
    existing_file_in(model, &dir, fill)
}

fn read(model: &mut NamespaceModel) -> Option<JobData> {
    existing_file(model, |file, data| {
        data.offset = Some(file.data_pattern_offset);
        data.length = Some(file.data_pattern_length);
        data.hash = file.expected_read().map(|(_, _, hash)| hash.to_string());
    })
}

fn write(model: &mut NamespaceModel) -> Option<JobData> {
    let sequential = model.rng().gen_bool(0.5);
    existing_file(model, |file, data| {
        data.offset = Some(file.data_pattern_offset);
        data.length = Some(file.data_pattern_length);
        data.io_type = Some(if sequential && file.data_pattern.is_some() {
            IoType::Sequential
        } else {
            IoType::Random
        });
        file.begin_mutation();
    })
}

fn truncate(model: &mut NamespaceModel) -> Option<JobData> {
    let growth = model.rng().gen_range(0..=TRUNCATE_GROWTH);
    let fraction: f64 = model.rng().gen();
    existing_file(model, |file, data| {
        // Shrink or grow, roughly evenly
        let size = if fraction < 0.5 {
            (file.size as f64 * fraction * 2.0) as u64
        } else {
            file.size + growth
        };
        data.size = Some(size);
        file.begin_mutation();
    })
}

fn rename(model: &mut NamespaceModel) -> Option<JobData> {
    let dir = model.random_synced_directory()?;
    let new_name = model.next_name();
    let dest = model.directory(&dir)?.file_path(&new_name);
    existing_file_in(model, &dir, |_, data| {
        data.rename_source = Some(data.target.clone());
        data.rename_dest = Some(dest);
    })
}

fn rename_exist(model: &mut NamespaceModel) -> Option<JobData> {
    let source_dir = model.random_synced_directory()?;
    let source_name = model.random_synced_file(&source_dir)?;
    let dest_dir = model.random_synced_directory()?;
    let dest_name = model.random_synced_file(&dest_dir)?;

    // Same file name reads as a self-rename on the worker; reject before any tid is spent
    if source_name == dest_name {
        return None;
    }

    let dest_entry = model.directory_mut(&dest_dir)?;
    let dest = dest_entry.file_path(&dest_name);
    let dest_file = dest_entry.file_mut(&dest_name)?;
    let dest_tid = dest_file.allocate_tid();
    dest_file.begin_mutation();

    let source_entry = model.directory_mut(&source_dir)?;
    let source = source_entry.file_path(&source_name);
    let file = source_entry.file_mut(&source_name)?;
    let mut data = stamped(source.clone(), file);
    data.rename_source = Some(source);
    data.rename_dest = Some(dest);
    data.dest_tid = Some(dest_tid);
    Some(data)
}

fn existing_file_in(
    model: &mut NamespaceModel,
    dir: &str,
    fill: impl FnOnce(&mut File, &mut JobData),
) -> Option<JobData> {
    let name = model.random_synced_file(dir)?;
    let entry = model.directory_mut(dir)?;
    let path = entry.file_path(&name);
    let file = entry.file_mut(&name)?;
    let mut data = stamped(path, file);
    fill(file, &mut data);
    Some(data)
}

/// Job data carrying a fresh tid and the file's session token
fn stamped(path: String, file: &mut File) -> JobData {
    let mut data = JobData::new(path);
    data.tid = Some(file.allocate_tid());
    data.uuid = Some(file.uuid);
    data
}
