//! Kernel byte-range locks on the open file
//!
//! On Linux and Android these are open file description locks, so two opens
//! of one file conflict even inside a single worker process. Other unix
//! hosts get classic POSIX record locks, which only conflict across
//! processes.

use super::LockMode;
use crate::error::{LockError, LockResult};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use std::os::fd::RawFd;

/// Take a non-blocking lock on `[offset, offset + length)` of `fd`
///
/// `handle` only labels the error when the range is already held.
pub fn acquire(fd: RawFd, handle: u64, offset: u64, length: u64, mode: LockMode) -> LockResult<()> {
    let kind = match mode {
        LockMode::Shared => libc::F_RDLCK,
        LockMode::Exclusive => libc::F_WRLCK,
    };
    set_lock(fd, kind as libc::c_short, offset, length).map_err(|errno| match errno {
        Errno::EAGAIN | Errno::EACCES => LockError::Unavailable {
            handle,
            offset,
            length,
        },
        other => native_error(other),
    })
}

/// Drop a lock taken by [`acquire`]
pub fn release(fd: RawFd, offset: u64, length: u64) -> LockResult<()> {
    set_lock(fd, libc::F_UNLCK as libc::c_short, offset, length).map_err(native_error)
}

fn native_error(errno: Errno) -> LockError {
    LockError::Native {
        errno: errno as i32,
        reason: errno.desc().to_string(),
    }
}

fn set_lock(fd: RawFd, kind: libc::c_short, offset: u64, length: u64) -> nix::Result<()> {
    let start = libc::off_t::try_from(offset).map_err(|_| Errno::EOVERFLOW)?;
    // A length past off_t means "to end of file", which fcntl spells as 0
    let len = libc::off_t::try_from(length).unwrap_or(0);

    // SAFETY: flock is plain old data; all-zero is a valid value (l_pid must be 0 for OFD locks)
    let mut lock: libc::flock = unsafe { std::mem::zeroed() };
    lock.l_type = kind;
    lock.l_whence = libc::SEEK_SET as libc::c_short;
    lock.l_start = start;
    lock.l_len = len;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let arg = FcntlArg::F_OFD_SETLK(&lock);
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let arg = FcntlArg::F_SETLK(&lock);

    fcntl(fd, arg).map(|_| ())
}
