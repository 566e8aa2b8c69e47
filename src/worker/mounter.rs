//! Mount points of the filesystem under test
//!
//! Mounting itself is left to the operator. [`StaticMounter`] only checks
//! that each supplied path is an existing directory.

use crate::error::ConfigError;
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::info;

/// Source of mount points for job execution
pub trait Mounter: Send + Sync {
    /// Make every mount point usable
    fn mount_all(&mut self) -> Result<(), ConfigError>;

    /// All mount points
    fn mountpoints(&self) -> &[PathBuf];

    /// One mount point, chosen uniformly
    fn random_mountpoint(&self) -> &Path;
}

/// Pre-mounted paths
#[derive(Debug, Clone)]
pub struct StaticMounter {
    mounts: Vec<PathBuf>,
}

impl StaticMounter {
    pub fn new(mounts: Vec<PathBuf>) -> Result<Self, ConfigError> {
        if mounts.is_empty() {
            return Err(ConfigError::NoMountPoints);
        }
        Ok(Self { mounts })
    }
}

impl Mounter for StaticMounter {
    fn mount_all(&mut self) -> Result<(), ConfigError> {
        for path in &self.mounts {
            let meta = std::fs::metadata(path).map_err(|e| ConfigError::InvalidMountPoint {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            if !meta.is_dir() {
                return Err(ConfigError::InvalidMountPoint {
                    path: path.clone(),
                    reason: "not a directory".to_string(),
                });
            }
        }
        info!(mounts = self.mounts.len(), "Mount points ready");
        Ok(())
    }

    fn mountpoints(&self) -> &[PathBuf] {
        &self.mounts
    }

    fn random_mountpoint(&self) -> &Path {
        let idx = rand::thread_rng().gen_range(0..self.mounts.len());
        &self.mounts[idx]
    }
}
