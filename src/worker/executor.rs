//! Job execution against a mounted filesystem
//!
//! Every action maps to one or two filesystem calls. Failures are reported
//! back with the errno and the source line that produced them; the worker
//! never interprets them.

use super::mounter::Mounter;
use crate::content::{content_hash, random_pattern};
use crate::error::{LockError, LockResult};
#[cfg(unix)]
use crate::lock::native;
use crate::lock::{LockCoordinator, LockMode};
use crate::protocol::codes::{errno_of, NO_TARGET, SAMEFILE};
use crate::protocol::{Action, ErrorKind, IoType, JobData, JobPayload, ResultData, ResultMessage};
use rand::seq::SliceRandom;
use rand::Rng;
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

const EIO: i32 = 5;
const EINVAL: i32 = 22;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;
const TB: u64 = 1024 * GB;

/// Base offsets for random writes, around allocation boundaries
const OFFSETS: [u64; 10] = [0, 3499, KB, 4 * KB, MB, 512 * MB, GB, 256 * GB, 512 * GB, TB];

/// Extra shift applied to half of the random writes
const ZERO_PADDING: u64 = 128 * MB;

/// Bytes read when a read job names no range
const READ_SAMPLE_LEN: u64 = 4 * KB;

/// A failed operation, as reported to the controller
#[derive(Debug)]
struct Failure {
    code: i32,
    message: String,
    line: u32,
}

impl Failure {
    fn new(code: i32, message: impl Into<String>, line: u32) -> Self {
        Self {
            code,
            message: message.into(),
            line,
        }
    }
}

/// Attach the failing source line to an error
trait AtLine<T> {
    fn at_line(self, line: u32) -> Result<T, Failure>;
}

impl<T> AtLine<T> for std::io::Result<T> {
    fn at_line(self, line: u32) -> Result<T, Failure> {
        self.map_err(|e| Failure::new(errno_of(&e), e.to_string(), line))
    }
}

impl<T> AtLine<T> for LockResult<T> {
    fn at_line(self, line: u32) -> Result<T, Failure> {
        self.map_err(|e| {
            let code = match e {
                LockError::Unavailable { .. } => ErrorKind::LockUnavailable.code(),
                LockError::Native { errno, .. } => errno,
                _ => EIO,
            };
            Failure::new(code, e.to_string(), line)
        })
    }
}

/// Lock handle for an open file: the inode, which every host sees alike
fn file_handle(meta: &std::fs::Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.ino()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        0
    }
}

/// The open file a lock applies to
#[derive(Debug, Clone, Copy)]
struct LockTarget {
    handle: u64,
    #[cfg(unix)]
    fd: std::os::fd::RawFd,
}

impl LockTarget {
    async fn of(file: &fs::File) -> Result<Self, Failure> {
        let meta = file.metadata().await.at_line(line!())?;
        Ok(Self {
            handle: file_handle(&meta),
            #[cfg(unix)]
            fd: std::os::fd::AsRawFd::as_raw_fd(file),
        })
    }
}

fn resolve(mount: &Path, target: &str) -> PathBuf {
    mount.join(target.trim_start_matches('/'))
}

/// How reads and writes guard their byte range
#[derive(Clone)]
pub enum Locking {
    Off,
    /// fcntl record locks on the open file
    Native,
    /// Locks kept in a store shared by all workers
    Application(LockCoordinator),
}

/// Runs jobs on one of the mount points
pub struct JobExecutor {
    mounter: Arc<dyn Mounter>,
    locking: Locking,
    max_write_offset: u64,
}

impl JobExecutor {
    pub fn new(mounter: Arc<dyn Mounter>, locking: Locking, max_write_offset: u64) -> Self {
        Self {
            mounter,
            locking,
            max_write_offset,
        }
    }

    /// Run one job and build its result
    pub async fn execute(&self, payload: &JobPayload) -> ResultMessage {
        let action = payload.action;
        let data = &payload.data;
        let mount = self.mounter.random_mountpoint().to_path_buf();

        let outcome = if data.target.trim_start_matches('/').is_empty() {
            Err(Failure::new(NO_TARGET, "Target not specified", line!()))
        } else {
            let path = resolve(&mount, &data.target);
            match action {
                Action::Mkdir => self.mkdir(&path, data).await,
                Action::Touch => self.touch(&path, data).await,
                Action::Stat => self.stat(&path, data).await,
                Action::List => self.list(&path, data).await,
                Action::Read => self.read(&path, data).await,
                Action::Write => self.write(&path, data).await,
                Action::Delete => self.delete(&path, data).await,
                Action::Truncate => self.truncate(&path, data).await,
                Action::Rename => self.rename(&mount, &path, data).await,
                Action::RenameExist => self.rename_exist(&mount, data).await,
            }
        };

        match outcome {
            Ok(result) => ResultMessage::success(action, data.target.clone(), result),
            Err(failure) => {
                debug!(
                    action = %action,
                    path = %data.target,
                    code = failure.code,
                    error = %failure.message,
                    "Job failed"
                );
                ResultMessage::failure(
                    action,
                    data.target.clone(),
                    failure.code,
                    failure.message,
                    ResultData::echo(data),
                )
                .with_line(failure.line)
            }
        }
    }

    /// Run `op` while holding a lock on `[offset, offset + length)`
    async fn with_lock<T>(
        &self,
        target: LockTarget,
        offset: u64,
        length: u64,
        mode: LockMode,
        op: impl Future<Output = Result<T, Failure>>,
    ) -> Result<T, Failure> {
        let handle = target.handle;
        match &self.locking {
            Locking::Off => op.await,
            Locking::Native => with_native_lock(target, offset, length, mode, op).await,
            Locking::Application(locks) => {
                locks
                    .acquire(handle, offset, length, mode)
                    .await
                    .at_line(line!())?;
                let outcome = op.await;
                if let Err(e) = locks.release(handle, offset, length).await {
                    warn!(handle, offset, length, error = %e, "Failed to release lock");
                }
                outcome
            }
        }
    }

    async fn mkdir(&self, path: &Path, data: &JobData) -> Result<ResultData, Failure> {
        fs::create_dir(path).await.at_line(line!())?;
        let mut out = ResultData::echo(data);
        out.dirsize = Some(0);
        Ok(out)
    }

    async fn touch(&self, path: &Path, data: &JobData) -> Result<ResultData, Failure> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .at_line(line!())?;
        file.write_all(b"\0").await.at_line(line!())?;
        file.sync_all().await.at_line(line!())?;
        Ok(ResultData::echo(data))
    }

    async fn stat(&self, path: &Path, data: &JobData) -> Result<ResultData, Failure> {
        let meta = fs::metadata(path).await.at_line(line!())?;
        let mut out = ResultData::echo(data);
        out.size = Some(meta.len());
        Ok(out)
    }

    async fn list(&self, path: &Path, data: &JobData) -> Result<ResultData, Failure> {
        let mut entries = fs::read_dir(path).await.at_line(line!())?;
        let mut count = 0u64;
        while entries.next_entry().await.at_line(line!())?.is_some() {
            count += 1;
        }
        let mut out = ResultData::echo(data);
        out.entries = Some(count);
        Ok(out)
    }

    async fn read(&self, path: &Path, data: &JobData) -> Result<ResultData, Failure> {
        let offset = data.offset.unwrap_or(0);
        let length = match data.length {
            Some(length) if length > 0 => length,
            _ => READ_SAMPLE_LEN,
        };

        let mut file = fs::File::open(path).await.at_line(line!())?;
        let target = LockTarget::of(&file).await?;

        let buf = self
            .with_lock(target, offset, length, LockMode::Shared, async {
                file.seek(SeekFrom::Start(offset)).await.at_line(line!())?;
                let mut buf = Vec::with_capacity(length as usize);
                (&mut file)
                    .take(length)
                    .read_to_end(&mut buf)
                    .await
                    .at_line(line!())?;
                Ok(buf)
            })
            .await?;

        let mut out = ResultData::echo(data);
        out.hash = Some(content_hash(&buf));
        out.offset = Some(offset);
        out.length = Some(length);
        Ok(out)
    }

    /// Write a random pattern, then read it back and compare
    async fn write(&self, path: &Path, data: &JobData) -> Result<ResultData, Failure> {
        let (offset, pattern) = {
            let mut rng = rand::thread_rng();
            let offset = match data.io_type.unwrap_or(IoType::Random) {
                IoType::Sequential => data.offset.unwrap_or(0) + data.length.unwrap_or(0),
                IoType::Random => self.random_offset(&mut rng),
            };
            (offset, random_pattern(&mut rng))
        };
        let bytes = pattern.bytes();
        let length = pattern.len();
        let expected = pattern.hash();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .at_line(line!())?;
        let target = LockTarget::of(&file).await?;

        let read_back = self
            .with_lock(target, offset, length, LockMode::Exclusive, async {
                file.seek(SeekFrom::Start(offset)).await.at_line(line!())?;
                file.write_all(&bytes).await.at_line(line!())?;
                file.flush().await.at_line(line!())?;
                file.sync_all().await.at_line(line!())?;

                file.seek(SeekFrom::Start(offset)).await.at_line(line!())?;
                let mut buf = Vec::with_capacity(bytes.len());
                (&mut file)
                    .take(length)
                    .read_to_end(&mut buf)
                    .await
                    .at_line(line!())?;
                Ok(buf)
            })
            .await?;

        let mut out = ResultData::echo(data);
        let actual = content_hash(&read_back);
        if actual != expected {
            warn!(path = %data.target, offset, length, "Read-back after write does not match pattern");
            out.bad_hash = Some(actual);
        }
        out.offset = Some(offset);
        out.length = Some(length);
        out.pattern = Some(pattern);
        out.hash = Some(expected);
        Ok(out)
    }

    fn random_offset<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let padding = if rng.gen_bool(0.5) { 0 } else { ZERO_PADDING };
        let candidates: Vec<u64> = OFFSETS
            .iter()
            .map(|base| base + padding)
            .filter(|offset| *offset <= self.max_write_offset)
            .collect();
        candidates.choose(rng).copied().unwrap_or(0)
    }

    async fn delete(&self, path: &Path, data: &JobData) -> Result<ResultData, Failure> {
        fs::remove_file(path).await.at_line(line!())?;
        Ok(ResultData::echo(data))
    }

    async fn truncate(&self, path: &Path, data: &JobData) -> Result<ResultData, Failure> {
        let Some(size) = data.size else {
            return Err(Failure::new(EINVAL, "Truncate without size", line!()));
        };
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .at_line(line!())?;
        file.set_len(size).await.at_line(line!())?;
        file.sync_all().await.at_line(line!())?;
        let mut out = ResultData::echo(data);
        out.size = Some(size);
        Ok(out)
    }

    async fn rename(&self, mount: &Path, path: &Path, data: &JobData) -> Result<ResultData, Failure> {
        let Some(dest) = data.rename_dest.as_deref() else {
            return Err(Failure::new(NO_TARGET, "Rename destination not specified", line!()));
        };
        fs::rename(path, resolve(mount, dest))
            .await
            .at_line(line!())?;
        Ok(ResultData::echo(data))
    }

    /// Move a file over another existing file
    async fn rename_exist(&self, mount: &Path, data: &JobData) -> Result<ResultData, Failure> {
        let source = data.rename_source.as_deref().unwrap_or(&data.target);
        let Some(dest) = data.rename_dest.as_deref() else {
            return Err(Failure::new(NO_TARGET, "Rename destination not specified", line!()));
        };
        let (source, dest) = (resolve(mount, source), resolve(mount, dest));
        if source.file_name() == dest.file_name() {
            return Err(Failure::new(
                SAMEFILE,
                "Trying to move file into itself",
                line!(),
            ));
        }
        fs::rename(&source, &dest).await.at_line(line!())?;
        Ok(ResultData::echo(data))
    }
}

#[cfg(unix)]
async fn with_native_lock<T>(
    target: LockTarget,
    offset: u64,
    length: u64,
    mode: LockMode,
    op: impl Future<Output = Result<T, Failure>>,
) -> Result<T, Failure> {
    native::acquire(target.fd, target.handle, offset, length, mode).at_line(line!())?;
    let outcome = op.await;
    if let Err(e) = native::release(target.fd, offset, length) {
        warn!(handle = target.handle, offset, length, error = %e, "Failed to release lock");
    }
    outcome
}

#[cfg(not(unix))]
async fn with_native_lock<T>(
    _target: LockTarget,
    _offset: u64,
    _length: u64,
    _mode: LockMode,
    _op: impl Future<Output = Result<T, Failure>>,
) -> Result<T, Failure> {
    Err(Failure::new(EINVAL, "Native locking needs a unix host", line!()))
}
