//! Job generation
//!
//! Produces an endless stream of jobs against the namespace model:
//! - jobs orphaned by a disconnected worker are reissued first
//! - otherwise an action is drawn from the weight table and a target chosen
//! - an empty model always yields mkdir
//!
//! A draw whose action has no valid target is simply redrawn.

pub mod targets;
pub mod weights;

pub use weights::{ActionWeights, WeightedChoice, WEIGHT_TOTAL};

use crate::model::NamespaceModel;
use crate::protocol::{Action, JobFrame, JobId, JobPayload};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

/// Redraws before the generator falls back to mkdir
const MAX_EMPTY_DRAWS: usize = 64;

/// A unit of work owned by the controller until reconciled or requeued
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    /// When this id was handed out
    pub issued: Instant,
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: JobId::generate(),
            payload,
            issued: Instant::now(),
        }
    }

    /// Same work under a new id
    pub fn reissue(self) -> Self {
        Self::new(self.payload)
    }

    pub fn action(&self) -> Action {
        self.payload.action
    }

    pub fn target(&self) -> &str {
        &self.payload.data.target
    }

    /// Wire frame for this job
    pub fn frame(&self) -> JobFrame {
        JobFrame(self.id.clone(), self.payload.clone())
    }
}

/// Weighted random job source
pub struct JobGenerator {
    choice: WeightedChoice<Action>,
    requeued: VecDeque<Job>,
    generated: u64,
    reissued: u64,
}

impl JobGenerator {
    pub fn new(weights: &ActionWeights) -> Self {
        Self {
            choice: WeightedChoice::from_weights(weights),
            requeued: VecDeque::new(),
            generated: 0,
            reissued: 0,
        }
    }

    /// Queue orphaned jobs for reissue ahead of new work
    pub fn requeue(&mut self, jobs: impl IntoIterator<Item = Job>) {
        self.requeued.extend(jobs);
    }

    /// Jobs waiting to be reissued
    pub fn requeued_len(&self) -> usize {
        self.requeued.len()
    }

    /// Total jobs produced, reissues included
    pub fn generated(&self) -> u64 {
        self.generated
    }

    pub fn reissued(&self) -> u64 {
        self.reissued
    }

    /// Next job
    pub fn next_job(&mut self, model: &mut NamespaceModel) -> Job {
        self.generated += 1;

        if let Some(job) = self.requeued.pop_front() {
            self.reissued += 1;
            let job = job.reissue();
            debug!(job = %job.id, action = %job.action(), target = %job.target(), "Reissuing orphaned job");
            return job;
        }

        if model.synced_count() == 0 {
            if let Some(data) = targets::mkdir(model) {
                return Job::new(JobPayload {
                    action: Action::Mkdir,
                    data,
                });
            }
        } else {
            for _ in 0..MAX_EMPTY_DRAWS {
                let action = self.choice.sample(model.rng());
                if let Some(payload) = targets::select(action, model) {
                    return Job::new(payload);
                }
            }
        }

        Job::new(JobPayload {
            action: Action::Mkdir,
            data: targets::fallback_mkdir(model),
        })
    }
}
