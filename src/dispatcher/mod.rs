//! Job dispatch between the controller and its workers
//!
//! - `controller`: the single task that owns the model and drives dispatch
//! - `registry`: workers and the jobs each one holds
//! - `queue`: inbound (timestamp-ordered) and outbound (FIFO) queues
//! - `oplog`: optional CSV log of every reconciled result
//! - `transport`: TCP accept, decode and write tasks

pub mod controller;
pub mod oplog;
pub mod queue;
pub mod registry;
pub mod transport;

pub use controller::{
    ActionTotals, Controller, ControllerProgress, ControllerReport, ControllerStats, StopReason,
};
pub use oplog::{OperationLog, OperationRecord};
pub use queue::{Inbound, InboundQueue, Outbound, OutboundQueue};
pub use registry::{WorkerId, WorkerRegistry, DEFAULT_MAX_JOBS_PER_WORKER};
pub use transport::{Router, RouterHandle};
