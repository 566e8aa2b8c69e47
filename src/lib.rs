//! nfs-dynamo - Distributed Filesystem Stress Tester
//!
//! A controller keeps an in-memory model of what a shared filesystem should
//! contain, hands randomized filesystem operations to many workers, and
//! checks every result against the model. Any disagreement is an anomaly:
//! a sign that the filesystem under test lost, reordered, or corrupted data.
//!
//! # Features
//!
//! - **Namespace Model**: Directories and files the controller expects to
//!   exist, with pending mutations tracked per entry so concurrent jobs on
//!   the same name are not misjudged.
//!
//! - **Weighted Job Mix**: Actions are drawn from a configurable weight
//!   table. Jobs abandoned by a departed worker are reissued first.
//!
//! - **Content Verification**: Every write records a checksum that later
//!   reads must reproduce.
//!
//! - **Byte-Range Locking**: Kernel `fcntl` locks on the file by default, or
//!   application-level locks shared through Redis, so concurrent writers on
//!   different hosts do not race.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Controller                               │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────────┐    │
//! │  │  Generator   │──▶│  Namespace   │◀──│    Reconciler     │    │
//! │  │ (weights)    │   │    Model     │   │ (verdicts)        │    │
//! │  └──────┬───────┘   └──────────────┘   └─────────▲─────────┘    │
//! │         │                                        │              │
//! │         ▼                                        │              │
//! │  ┌──────────────┐                        ┌───────┴────────┐     │
//! │  │   Outbound   │                        │    Inbound     │     │
//! │  │    Queue     │                        │     Queue      │     │
//! │  └──────┬───────┘                        └───────▲────────┘     │
//! │         │          TCP router (JSON lines)       │              │
//! └─────────┼────────────────────────────────────────┼──────────────┘
//!           ▼                                        │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐      │
//! │  │Worker 1 │  │Worker 2 │  │Worker 3 │  ...    │Worker N │      │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘      │
//! │       └────────────┴─────┬──────┴────────────────────┘          │
//! │                          ▼                                      │
//! │                 Filesystem under test  ◀──▶  Redis (locks)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Controller
//! nfs-dynamo control --listen 0.0.0.0:5557 --max-dirs 200 --duration 600
//!
//! # Workers, one per client host
//! nfs-dynamo work -c controller:5557 -m /mnt/nfs1 -m /mnt/nfs2
//! ```

pub mod config;
pub mod content;
pub mod dispatcher;
pub mod error;
pub mod generator;
pub mod lock;
pub mod model;
pub mod progress;
pub mod protocol;
pub mod reconciler;
pub mod shutdown;
pub mod worker;

pub use config::{CliArgs, ControllerConfig, LockingMode, WorkerConfig};
pub use dispatcher::{Controller, ControllerReport, Router, StopReason};
pub use error::{DynamoError, Result};
pub use model::NamespaceModel;
pub use reconciler::{ResponseReconciler, Verdict};
pub use worker::{JobExecutor, Locking, WorkerClient};
