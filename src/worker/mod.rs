//! Worker process
//!
//! Workers execute jobs against their own mount of the filesystem under test
//! and report results to the controller.

mod client;
mod executor;
mod mounter;

pub use client::{WorkerClient, WorkerStats, WorkerSummary};
pub use executor::{JobExecutor, Locking};
pub use mounter::{Mounter, StaticMounter};
