//! Error codes reported by workers
//!
//! Workers report raw errno values for filesystem failures and a small set
//! of harness-internal codes above `0x100`. Older workers sometimes send only
//! a message, so classification also looks at well-known message fragments.

/// Source and destination of a rename resolve to the same file
pub const SAMEFILE: i32 = 0x100;

/// The job carried no usable target
pub const NO_TARGET: i32 = 0x101;

/// Directory hit its size limit
pub const MAX_DIR_SIZE: i32 = 0x102;

/// Data read back after a write does not match the pattern hash
pub const HASHERR: i32 = 0x103;

const ENOENT: i32 = 2;
const EAGAIN: i32 = 11;
const EEXIST: i32 = 17;
const EFBIG: i32 = 27;
const ESTALE: i32 = 116;

/// Classified failure reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// ENOENT
    NotFound,
    /// EEXIST
    AlreadyExists,
    /// ESTALE
    StaleHandle,
    /// EAGAIN, byte-range lock held by someone else
    LockUnavailable,
    /// Target not specified
    NoTarget,
    /// Rename onto itself
    SameFile,
    /// Directory size limit reached
    DirSizeLimit,
    /// Read-back verification failed
    HashMismatch,
    /// Anything else
    Other(i32),
}

impl ErrorKind {
    /// Classify a failure from its code and message
    pub fn classify(code: Option<i32>, message: Option<&str>) -> Self {
        let by_code = code.map(Self::from_code);
        match by_code {
            Some(ErrorKind::Other(code)) => message
                .and_then(Self::from_message)
                .unwrap_or(ErrorKind::Other(code)),
            Some(kind) => kind,
            None => message
                .and_then(Self::from_message)
                .unwrap_or(ErrorKind::Other(0)),
        }
    }

    /// Map a numeric code
    pub fn from_code(code: i32) -> Self {
        match code {
            ENOENT => ErrorKind::NotFound,
            EEXIST => ErrorKind::AlreadyExists,
            ESTALE => ErrorKind::StaleHandle,
            EAGAIN => ErrorKind::LockUnavailable,
            EFBIG | MAX_DIR_SIZE => ErrorKind::DirSizeLimit,
            NO_TARGET => ErrorKind::NoTarget,
            SAMEFILE => ErrorKind::SameFile,
            HASHERR => ErrorKind::HashMismatch,
            other => ErrorKind::Other(other),
        }
    }

    fn from_message(message: &str) -> Option<Self> {
        let lower = message.to_ascii_lowercase();
        if lower.contains("target not specified") {
            Some(ErrorKind::NoTarget)
        } else if lower.contains("file exists") {
            Some(ErrorKind::AlreadyExists)
        } else if lower.contains("size limit") {
            Some(ErrorKind::DirSizeLimit)
        } else if lower.contains("stale file handle") {
            Some(ErrorKind::StaleHandle)
        } else if lower.contains("no such file or directory") {
            Some(ErrorKind::NotFound)
        } else {
            None
        }
    }

    /// Numeric code for this kind
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::NotFound => ENOENT,
            ErrorKind::AlreadyExists => EEXIST,
            ErrorKind::StaleHandle => ESTALE,
            ErrorKind::LockUnavailable => EAGAIN,
            ErrorKind::NoTarget => NO_TARGET,
            ErrorKind::SameFile => SAMEFILE,
            ErrorKind::DirSizeLimit => MAX_DIR_SIZE,
            ErrorKind::HashMismatch => HASHERR,
            ErrorKind::Other(code) => *code,
        }
    }
}

/// Errno of an I/O error, falling back to the closest known kind
pub fn errno_of(err: &std::io::Error) -> i32 {
    if let Some(code) = err.raw_os_error() {
        return code;
    }
    match err.kind() {
        std::io::ErrorKind::NotFound => ENOENT,
        std::io::ErrorKind::AlreadyExists => EEXIST,
        std::io::ErrorKind::WouldBlock => EAGAIN,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_code() {
        assert_eq!(ErrorKind::classify(Some(2), None), ErrorKind::NotFound);
        assert_eq!(ErrorKind::classify(Some(17), None), ErrorKind::AlreadyExists);
        assert_eq!(ErrorKind::classify(Some(NO_TARGET), None), ErrorKind::NoTarget);
        assert_eq!(ErrorKind::classify(Some(MAX_DIR_SIZE), None), ErrorKind::DirSizeLimit);
        assert_eq!(ErrorKind::classify(Some(5), None), ErrorKind::Other(5));
    }

    #[test]
    fn test_classify_by_message() {
        assert_eq!(
            ErrorKind::classify(None, Some("Target not specified")),
            ErrorKind::NoTarget
        );
        assert_eq!(
            ErrorKind::classify(Some(-1), Some("[Errno 17] File exists: '/mnt/a'")),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            ErrorKind::classify(None, Some("directory size limit reached")),
            ErrorKind::DirSizeLimit
        );
        assert_eq!(ErrorKind::classify(None, Some("weird")), ErrorKind::Other(0));
    }

    #[test]
    fn test_errno_of() {
        let err = std::io::Error::from_raw_os_error(116);
        assert_eq!(errno_of(&err), 116);
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(errno_of(&err), 2);
    }
}
