//! Error types for nfs-dynamo
//!
//! This module defines the error hierarchy shared by the controller and the
//! worker:
//! - Configuration and CLI errors (fatal at startup)
//! - Wire protocol and transport errors (fatal to the controller)
//! - Byte-range lock errors
//! - Worker-side execution errors
//!
//! Errors that describe the *filesystem under test* misbehaving are not
//! errors here: those are reconciler verdicts, see [`crate::reconciler`].

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for nfs-dynamo
#[derive(Error, Debug)]
pub enum DynamoError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed or out-of-order protocol messages
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Network transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Byte-range lock errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Worker errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation log could not be written
    #[error("Operation log error: {0}")]
    OperationLog(#[from] csv::Error),

    /// A background task panicked or was cancelled
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Action weights do not add up to 100
    #[error("Action weights must sum to 100, got {total}")]
    WeightSum { total: u32 },

    /// Unknown action in the weight table
    #[error("Unknown action '{name}' in weight table")]
    UnknownAction { name: String },

    /// Invalid handler pool size
    #[error("Invalid {pool} handler count {count}: must be between 1 and {max}")]
    InvalidHandlerCount {
        pool: &'static str,
        count: usize,
        max: usize,
    },

    /// A numeric limit that must be positive was zero
    #[error("Invalid {name}: must be greater than zero")]
    ZeroLimit { name: &'static str },

    /// Test config file could not be read or parsed
    #[error("Cannot load test config '{path}': {reason}")]
    InvalidConfigFile { path: PathBuf, reason: String },

    /// File-name seed list could not be read
    #[error("Cannot read file name list '{path}': {reason}")]
    InvalidNameList { path: PathBuf, reason: String },

    /// Worker was started without mount points
    #[error("No mount points given: pass at least one --mount")]
    NoMountPoints,

    /// Mount point is missing or not a directory
    #[error("Invalid mount point '{path}': {reason}")]
    InvalidMountPoint { path: PathBuf, reason: String },

    /// Address could not be parsed
    #[error("Invalid address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },
}

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Message could not be decoded
    #[error("Malformed message from {peer}: {reason}")]
    Malformed { peer: String, reason: String },

    /// A worker sent `connect` while already registered
    #[error("Worker {worker} is already connected")]
    DuplicateConnect { worker: String },

    /// Timestamp did not match the wire format
    #[error("Invalid timestamp '{value}'")]
    InvalidTimestamp { value: String },

    /// JSON encoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Network transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not bind the listening socket
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    /// Accept loop failed
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(String),

    /// Could not reach the controller
    #[error("Failed to connect to controller at {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },

    /// Write to a peer failed
    #[error("Failed to send to {peer}: {reason}")]
    SendFailed { peer: String, reason: String },
}

/// Byte-range lock errors
#[derive(Error, Debug)]
pub enum LockError {
    /// Requested range overlaps a held range (EAGAIN)
    #[error("Lock unavailable on handle {handle} for [{offset}, +{length})")]
    Unavailable {
        handle: u64,
        offset: u64,
        length: u64,
    },

    /// Lock store could not be reached
    #[error("Failed to connect to lock store '{url}': {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Lock store command failed
    #[error("Lock store error: {0}")]
    Store(String),

    /// Stored lock entry could not be decoded
    #[error("Corrupt lock entry '{field}': {reason}")]
    CorruptEntry { field: String, reason: String },

    /// Kernel record lock call failed
    #[error("fcntl lock failed: {reason}")]
    Native { errno: i32, reason: String },
}

impl LockError {
    /// Check if this is a contention failure rather than a store failure
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LockError::Unavailable { .. })
    }
}

impl From<redis::RedisError> for LockError {
    fn from(e: redis::RedisError) -> Self {
        LockError::Store(e.to_string())
    }
}

/// Worker-side errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Result channel closed
    #[error("Result channel closed unexpectedly")]
    ResultChannelClosed,
}

/// Result type alias for DynamoError
pub type Result<T> = std::result::Result<T, DynamoError>;

/// Result type alias for LockError
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Result type alias for ProtocolError
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_unavailable() {
        let busy = LockError::Unavailable {
            handle: 7,
            offset: 0,
            length: 10,
        };
        assert!(busy.is_unavailable());

        let store = LockError::Store("connection reset".into());
        assert!(!store.is_unavailable());
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::WeightSum { total: 99 };
        assert_eq!(err.to_string(), "Action weights must sum to 100, got 99");

        let err = ProtocolError::DuplicateConnect {
            worker: "10.0.0.1:4000#3".into(),
        };
        assert!(err.to_string().contains("already connected"));
    }

    #[test]
    fn test_error_conversion() {
        let config_err = ConfigError::NoMountPoints;
        let err: DynamoError = config_err.into();
        assert!(matches!(err, DynamoError::Config(_)));

        let lock_err = LockError::Store("boom".into());
        let err: DynamoError = lock_err.into();
        assert!(matches!(err, DynamoError::Lock(_)));
    }
}
