//! Controller/worker wire protocol

pub mod action;
pub mod codes;
pub mod message;
pub mod timestamp;

pub use action::Action;
pub use codes::ErrorKind;
pub use message::{
    IoType, JobData, JobFrame, JobId, JobPayload, Outcome, ResultData, ResultMessage,
    WorkerMessage,
};
