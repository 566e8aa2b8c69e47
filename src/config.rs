//! Configuration types for nfs-dynamo
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros (`control` and `work`)
//! - The optional JSON test-config file read by the controller
//! - Validated runtime configuration for both roles

use crate::dispatcher::DEFAULT_MAX_JOBS_PER_WORKER;
use crate::error::ConfigError;
use crate::generator::ActionWeights;
use crate::model::tree::{DEFAULT_MAX_DIRS, DEFAULT_MAX_DIR_SIZE, DEFAULT_MAX_FILES_PER_DIR};
use crate::model::{ModelLimits, NamePool, NamespaceModel};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default controller port
pub const DEFAULT_PORT: u16 = 5557;

/// Maximum handler tasks per pool
const MAX_HANDLERS: usize = 512;

/// Maximum concurrent jobs on one worker
const MAX_CONCURRENCY: usize = 4096;

/// Default offset ceiling for random writes (1 GiB)
const DEFAULT_MAX_WRITE_OFFSET: u64 = 1 << 30;

/// Distributed filesystem stress tester
#[derive(Parser, Debug, Clone)]
#[command(
    name = "nfs-dynamo",
    version,
    about = "Distributed filesystem stress tester",
    long_about = "A controller keeps a model of the namespace on a shared filesystem, \
                  generates random file operations and sends them to workers.\n\n\
                  Workers run the operations against their own mount of the same \
                  filesystem and report back; the controller checks every result \
                  against its model and reports lost files and corrupted data.",
    after_help = "EXAMPLES:\n    \
        nfs-dynamo control --listen 0.0.0.0:5557 --duration 600\n    \
        nfs-dynamo control --config weights.json --max-dirs 20\n    \
        nfs-dynamo work --controller ctrl-host:5557 -m /mnt/nfs1 -m /mnt/nfs2\n    \
        REDIS_URL=redis://lockhost:6379 nfs-dynamo work -c ctrl-host:5557 -m /mnt/nfs"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output (log benign races and every applied result)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the controller: model the namespace and dispatch jobs
    Control(ControlArgs),

    /// Run a worker: execute jobs against mounted paths
    Work(WorkArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ControlArgs {
    /// Address to accept worker connections on
    #[arg(short = 'l', long, default_value = "0.0.0.0:5557", value_name = "ADDR")]
    pub listen: String,

    /// JSON test config (weights and model limits)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Maximum in-flight jobs per worker
    #[arg(long, value_name = "NUM")]
    pub max_jobs_per_worker: Option<usize>,

    /// Maximum number of live directories
    #[arg(long, value_name = "NUM")]
    pub max_dirs: Option<usize>,

    /// Evict a directory once it holds this many files
    #[arg(long, value_name = "NUM")]
    pub max_files_per_dir: Option<usize>,

    /// Evict a directory once its entry size reaches this many bytes
    #[arg(long, value_name = "BYTES")]
    pub max_dir_size: Option<u64>,

    /// Number of inbound message handler tasks
    #[arg(long, default_value = "16", value_name = "NUM")]
    pub inbound_handlers: usize,

    /// Number of outbound message handler tasks
    #[arg(long, default_value = "16", value_name = "NUM")]
    pub outbound_handlers: usize,

    /// Stop after dispatching this many jobs
    #[arg(long, value_name = "NUM")]
    pub max_jobs: Option<u64>,

    /// Stop after this many seconds
    #[arg(short = 'd', long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Pre-generated file names, one per line
    #[arg(long, value_name = "FILE")]
    pub file_names: Option<PathBuf>,

    /// Seed for the job generator (random if not set)
    #[arg(long, value_name = "NUM")]
    pub seed: Option<u64>,

    /// Idle wait when no worker can take a job, in milliseconds
    #[arg(long, default_value = "100", value_name = "MS")]
    pub idle_wait_ms: u64,

    /// Write one CSV row per reconciled result to this file
    #[arg(long, value_name = "FILE")]
    pub op_log: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct WorkArgs {
    /// Controller address
    #[arg(short = 'c', long, default_value = "127.0.0.1:5557", value_name = "ADDR")]
    pub controller: String,

    /// Mounted path of the filesystem under test (can be repeated)
    #[arg(short = 'm', long = "mount", value_name = "PATH", action = clap::ArgAction::Append)]
    pub mounts: Vec<PathBuf>,

    /// Number of jobs executed concurrently
    #[arg(short = 'j', long, default_value_t = default_concurrency(), value_name = "NUM")]
    pub concurrency: usize,

    /// Redis URL for the shared lock store
    #[arg(long, env = "REDIS_URL", value_name = "URL")]
    pub redis: Option<String>,

    /// Byte-range locking for reads and writes
    #[arg(long, value_enum, default_value_t = LockingMode::Native)]
    pub locking: LockingMode,

    /// Largest offset used by random-offset writes
    #[arg(long, default_value_t = DEFAULT_MAX_WRITE_OFFSET, value_name = "BYTES")]
    pub max_write_offset: u64,
}

/// How workers coordinate byte-range access
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockingMode {
    /// fcntl record locks taken by the kernel
    #[default]
    Native,
    /// Ranges are claimed in the shared lock store
    Application,
    /// No locking
    Off,
}

fn default_concurrency() -> usize {
    num_cpus::get() * 2
}

/// Test parameters read from `--config`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfigFile {
    /// Action name → weight, must sum to 100
    pub weights: Option<BTreeMap<String, u32>>,
    pub max_dirs: Option<usize>,
    pub max_files_per_dir: Option<usize>,
    pub max_dir_size: Option<u64>,
    pub max_jobs_per_worker: Option<usize>,
}

impl TestConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::InvalidConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Validated controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Listening address
    pub listen: SocketAddr,

    /// Action weights
    pub weights: ActionWeights,

    /// Model thresholds
    pub limits: ModelLimits,

    /// Per-worker in-flight cap
    pub max_jobs_per_worker: usize,

    /// Inbound decoder tasks
    pub inbound_handlers: usize,

    /// Outbound writer tasks
    pub outbound_handlers: usize,

    /// Dispatch limit
    pub max_jobs: Option<u64>,

    /// Wall-clock limit
    pub duration: Option<Duration>,

    /// File-name seed list
    pub file_names: Option<PathBuf>,

    /// Generator seed
    pub seed: Option<u64>,

    /// Bounded wait when no worker has capacity
    pub idle_wait: Duration,

    /// Per-operation CSV log
    pub op_log: Option<PathBuf>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            weights: ActionWeights::default(),
            limits: ModelLimits::default(),
            max_jobs_per_worker: DEFAULT_MAX_JOBS_PER_WORKER,
            inbound_handlers: 16,
            outbound_handlers: 16,
            max_jobs: None,
            duration: None,
            file_names: None,
            seed: None,
            idle_wait: Duration::from_millis(100),
            op_log: None,
            show_progress: false,
            verbose: false,
        }
    }
}

impl ControllerConfig {
    /// Create and validate configuration from CLI arguments
    ///
    /// Values given on the command line win over the test-config file.
    pub fn from_args(args: &ControlArgs, quiet: bool, verbose: bool) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => TestConfigFile::load(path)?,
            None => TestConfigFile::default(),
        };

        let listen = args
            .listen
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidAddress {
                addr: args.listen.clone(),
                reason: e.to_string(),
            })?;

        let weights = match &file.weights {
            Some(names) => ActionWeights::from_names(names)?,
            None => ActionWeights::default(),
        };

        let limits = ModelLimits {
            max_dirs: args.max_dirs.or(file.max_dirs).unwrap_or(DEFAULT_MAX_DIRS),
            max_files_per_dir: args
                .max_files_per_dir
                .or(file.max_files_per_dir)
                .unwrap_or(DEFAULT_MAX_FILES_PER_DIR),
            max_dir_size: args
                .max_dir_size
                .or(file.max_dir_size)
                .unwrap_or(DEFAULT_MAX_DIR_SIZE),
        };
        let max_jobs_per_worker = args
            .max_jobs_per_worker
            .or(file.max_jobs_per_worker)
            .unwrap_or(DEFAULT_MAX_JOBS_PER_WORKER);

        validate_positive("max_dirs", limits.max_dirs as u64)?;
        validate_positive("max_files_per_dir", limits.max_files_per_dir as u64)?;
        validate_positive("max_dir_size", limits.max_dir_size)?;
        validate_positive("max_jobs_per_worker", max_jobs_per_worker as u64)?;
        validate_positive("idle_wait_ms", args.idle_wait_ms)?;
        if let Some(max_jobs) = args.max_jobs {
            validate_positive("max_jobs", max_jobs)?;
        }
        if let Some(secs) = args.duration {
            validate_positive("duration", secs)?;
        }

        validate_handlers("inbound", args.inbound_handlers)?;
        validate_handlers("outbound", args.outbound_handlers)?;

        Ok(Self {
            listen,
            weights,
            limits,
            max_jobs_per_worker,
            inbound_handlers: args.inbound_handlers,
            outbound_handlers: args.outbound_handlers,
            max_jobs: args.max_jobs,
            duration: args.duration.map(Duration::from_secs),
            file_names: args.file_names.clone(),
            seed: args.seed,
            idle_wait: Duration::from_millis(args.idle_wait_ms),
            op_log: args.op_log.clone(),
            show_progress: !quiet,
            verbose,
        })
    }

    /// Empty namespace model with this configuration's limits, names and seed
    pub fn build_model(&self) -> Result<NamespaceModel, ConfigError> {
        let names = match &self.file_names {
            Some(path) => NamePool::load(path)?,
            None => NamePool::random(),
        };
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(NamespaceModel::with_parts(self.limits, names, rng))
    }
}

/// Validated worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Controller address (host:port, resolved on connect)
    pub controller: String,

    /// Mount points of the filesystem under test
    pub mounts: Vec<PathBuf>,

    /// Concurrent jobs
    pub concurrency: usize,

    /// Shared lock store
    pub redis_url: Option<String>,

    pub locking: LockingMode,

    /// Offset ceiling for random writes
    pub max_write_offset: u64,

    /// Verbose logging
    pub verbose: bool,
}

impl WorkerConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &WorkArgs, verbose: bool) -> Result<Self, ConfigError> {
        if args.mounts.is_empty() {
            return Err(ConfigError::NoMountPoints);
        }

        match args.controller.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => {
                return Err(ConfigError::InvalidAddress {
                    addr: args.controller.clone(),
                    reason: "expected HOST:PORT".to_string(),
                })
            }
        }

        if args.concurrency == 0 || args.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidHandlerCount {
                pool: "worker",
                count: args.concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        validate_positive("max_write_offset", args.max_write_offset)?;

        Ok(Self {
            controller: args.controller.clone(),
            mounts: args.mounts.clone(),
            concurrency: args.concurrency,
            redis_url: args.redis.clone(),
            locking: args.locking,
            max_write_offset: args.max_write_offset,
            verbose,
        })
    }
}

fn validate_positive(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroLimit { name });
    }
    Ok(())
}

fn validate_handlers(pool: &'static str, count: usize) -> Result<(), ConfigError> {
    if count == 0 || count > MAX_HANDLERS {
        return Err(ConfigError::InvalidHandlerCount {
            pool,
            count,
            max: MAX_HANDLERS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Action;
    use std::io::Write;

    fn control(extra: &[&str]) -> ControlArgs {
        let mut argv = vec!["nfs-dynamo", "control"];
        argv.extend_from_slice(extra);
        match CliArgs::parse_from(argv).command {
            Command::Control(args) => args,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_control_defaults() {
        let config = ControllerConfig::from_args(&control(&[]), false, false).unwrap();
        assert_eq!(config.listen.port(), DEFAULT_PORT);
        assert_eq!(config.limits, ModelLimits::default());
        assert_eq!(config.max_jobs_per_worker, DEFAULT_MAX_JOBS_PER_WORKER);
        assert_eq!(config.weights, ActionWeights::default());
        assert_eq!(config.idle_wait, Duration::from_millis(100));
        assert!(config.op_log.is_none());
        assert!(config.show_progress);

        let config =
            ControllerConfig::from_args(&control(&["--op-log", "/tmp/ops.csv"]), true, false).unwrap();
        assert_eq!(config.op_log, Some(PathBuf::from("/tmp/ops.csv")));
        assert!(!config.show_progress);
    }

    #[test]
    fn test_config_file_and_cli_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"weights": {{"mkdir": 50, "touch": 50}}, "max_dirs": 7, "max_dir_size": 4096}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = control(&["--config", &path, "--max-dirs", "3"]);
        let config = ControllerConfig::from_args(&args, true, false).unwrap();
        assert_eq!(config.limits.max_dirs, 3);
        assert_eq!(config.limits.max_dir_size, 4096);
        assert_eq!(config.limits.max_files_per_dir, DEFAULT_MAX_FILES_PER_DIR);
        assert_eq!(config.weights.weight(Action::Touch), 50);
        assert_eq!(config.weights.weight(Action::Stat), 0);
        assert!(!config.show_progress);
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"weights": {{"mkdir": 60, "touch": 30}}}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let err = ControllerConfig::from_args(&control(&["--config", &path]), false, false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::WeightSum { total: 90 }));
    }

    #[test]
    fn test_unknown_config_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_dirz": 5}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let err = ControllerConfig::from_args(&control(&["--config", &path]), false, false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfigFile { .. }));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ControllerConfig::from_args(&control(&["--max-dirs", "0"]), false, false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroLimit { name: "max_dirs" }));

        let err = ControllerConfig::from_args(&control(&["--inbound-handlers", "0"]), false, false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHandlerCount { pool: "inbound", .. }));

        let err = ControllerConfig::from_args(&control(&["--listen", "nowhere"]), false, false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));
    }

    #[test]
    fn test_build_model_uses_seeded_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alpha\nbeta").unwrap();
        let config = ControllerConfig {
            file_names: Some(file.path().to_path_buf()),
            seed: Some(1),
            ..Default::default()
        };
        let mut model = config.build_model().unwrap();
        assert_eq!(model.append_directory(), "alpha");
        assert_eq!(model.append_directory(), "beta");
    }

    #[test]
    fn test_worker_args() {
        let args = CliArgs::parse_from([
            "nfs-dynamo",
            "-v",
            "work",
            "--controller",
            "ctrl:6000",
            "-m",
            "/mnt/a",
            "-m",
            "/mnt/b",
            "--locking",
            "off",
        ]);
        assert!(args.verbose);
        let Command::Work(work) = args.command else {
            panic!("expected work");
        };
        let config = WorkerConfig::from_args(&work, true).unwrap();
        assert_eq!(config.mounts.len(), 2);
        assert_eq!(config.locking, LockingMode::Off);
        assert_eq!(config.controller, "ctrl:6000");
    }

    #[test]
    fn test_worker_requires_mounts() {
        let Command::Work(work) = CliArgs::parse_from(["nfs-dynamo", "work"]).command else {
            panic!("expected work");
        };
        assert!(matches!(
            WorkerConfig::from_args(&work, false),
            Err(ConfigError::NoMountPoints)
        ));
    }

    #[test]
    fn test_worker_locking_defaults_to_native() {
        let args = CliArgs::parse_from(["nfs-dynamo", "work", "-m", "/mnt/a"]);
        let Command::Work(work) = args.command else {
            panic!("expected work");
        };
        assert_eq!(work.locking, LockingMode::Native);

        let args = CliArgs::parse_from(["nfs-dynamo", "work", "-m", "/mnt/a", "--locking", "application"]);
        let Command::Work(work) = args.command else {
            panic!("expected work");
        };
        assert_eq!(work.locking, LockingMode::Application);
    }
}
