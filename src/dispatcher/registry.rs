//! Connected workers and the jobs each one holds

use crate::error::ProtocolError;
use crate::generator::Job;
use crate::protocol::JobId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Default per-worker in-flight cap
pub const DEFAULT_MAX_JOBS_PER_WORKER: usize = 100_000;

/// Opaque address of a worker connection, assigned by the router
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Worker address → in-flight jobs
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, HashMap<JobId, Job>>,
    max_jobs_per_worker: usize,
}

impl WorkerRegistry {
    pub fn new(max_jobs_per_worker: usize) -> Self {
        Self {
            workers: BTreeMap::new(),
            max_jobs_per_worker,
        }
    }

    /// Register a worker; registering twice is a protocol violation
    pub fn connect(&mut self, worker: WorkerId) -> Result<(), ProtocolError> {
        if self.workers.contains_key(&worker) {
            return Err(ProtocolError::DuplicateConnect {
                worker: worker.to_string(),
            });
        }
        self.workers.insert(worker, HashMap::new());
        Ok(())
    }

    /// Unregister a worker and hand back its in-flight jobs
    ///
    /// `None` when the worker was not registered.
    pub fn disconnect(&mut self, worker: &WorkerId) -> Option<Vec<Job>> {
        self.workers
            .remove(worker)
            .map(|jobs| jobs.into_values().collect())
    }

    /// Record a job as in flight on a worker
    pub fn assign(&mut self, worker: &WorkerId, job: Job) -> bool {
        match self.workers.get_mut(worker) {
            Some(jobs) => {
                jobs.insert(job.id.clone(), job);
                true
            }
            None => false,
        }
    }

    /// Remove a finished job from its worker
    pub fn complete(&mut self, worker: &WorkerId, job_id: &JobId) -> Option<Job> {
        self.workers.get_mut(worker)?.remove(job_id)
    }

    /// Worker with the fewest in-flight jobs, among those under the cap
    pub fn least_loaded(&self) -> Option<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, jobs)| jobs.len() < self.max_jobs_per_worker)
            .min_by_key(|(_, jobs)| jobs.len())
            .map(|(id, _)| id.clone())
    }

    pub fn is_connected(&self, worker: &WorkerId) -> bool {
        self.workers.contains_key(worker)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn in_flight(&self, worker: &WorkerId) -> usize {
        self.workers.get(worker).map(HashMap::len).unwrap_or(0)
    }

    pub fn total_in_flight(&self) -> usize {
        self.workers.values().map(HashMap::len).sum()
    }

    pub fn max_jobs_per_worker(&self) -> usize {
        self.max_jobs_per_worker
    }
}
