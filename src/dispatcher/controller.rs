//! The controller loop
//!
//! One task owns the namespace model, the job generator, the reconciler and
//! the worker registry. Network tasks only talk to it through the inbound
//! and outbound queues, so none of that state needs a lock.

use super::oplog::{OperationLog, OperationRecord};
use super::queue::{Inbound, InboundQueue, Outbound, OutboundQueue};
use super::registry::{WorkerId, WorkerRegistry};
use crate::config::ControllerConfig;
use crate::error::{ProtocolError, Result};
use crate::generator::JobGenerator;
use crate::model::NamespaceModel;
use crate::protocol::{Action, JobId, WorkerMessage};
use crate::reconciler::{Anomaly, ResponseReconciler, Verdict};
use crate::shutdown::Shutdown;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result counters for one action
#[derive(Debug, Default)]
struct ActionCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Results seen for one action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionTotals {
    pub succeeded: u64,
    pub failed: u64,
}

impl ActionTotals {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Counters shared with the progress display
#[derive(Debug, Default)]
pub struct ControllerStats {
    pub dispatched: AtomicU64,
    pub completed: AtomicU64,
    pub failures: AtomicU64,
    pub requeued: AtomicU64,
    pub anomalies: AtomicU64,
    pub bytes_written: AtomicU64,
    pub workers: AtomicU64,
    pub in_flight: AtomicU64,
    pub inbound_depth: AtomicU64,
    pub outbound_depth: AtomicU64,
    actions: [ActionCounters; Action::COUNT],
}

impl ControllerStats {
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result(&self, action: Action, success: bool, anomaly: bool, bytes_written: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        let counters = &self.actions[action.index()];
        if success {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if anomaly {
            self.anomalies.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_written.fetch_add(bytes_written, Ordering::Relaxed);
    }

    pub fn record_requeue(&self, count: u64) {
        self.requeued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_workers(&self, count: usize) {
        self.workers.store(count as u64, Ordering::Relaxed);
    }

    pub fn set_in_flight(&self, count: usize) {
        self.in_flight.store(count as u64, Ordering::Relaxed);
    }

    pub fn set_queue_depths(&self, inbound: usize, outbound: usize) {
        self.inbound_depth.store(inbound as u64, Ordering::Relaxed);
        self.outbound_depth.store(outbound as u64, Ordering::Relaxed);
    }

    /// Per-action totals, indexed like [`Action::ALL`]
    pub fn action_totals(&self) -> [ActionTotals; Action::COUNT] {
        std::array::from_fn(|i| ActionTotals {
            succeeded: self.actions[i].succeeded.load(Ordering::Relaxed),
            failed: self.actions[i].failed.load(Ordering::Relaxed),
        })
    }

    /// Point-in-time copy for display
    pub fn snapshot(&self, elapsed: Duration) -> ControllerProgress {
        ControllerProgress {
            workers: self.workers.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            inbound_depth: self.inbound_depth.load(Ordering::Relaxed),
            outbound_depth: self.outbound_depth.load(Ordering::Relaxed),
            actions: self.action_totals(),
            elapsed,
        }
    }
}

/// Progress snapshot
#[derive(Debug, Clone, Default)]
pub struct ControllerProgress {
    pub workers: u64,
    pub in_flight: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failures: u64,
    pub anomalies: u64,
    pub bytes_written: u64,
    pub inbound_depth: u64,
    pub outbound_depth: u64,
    pub actions: [ActionTotals; Action::COUNT],
    pub elapsed: Duration,
}

impl ControllerProgress {
    pub fn jobs_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stop signal (Ctrl-C or a fatal error elsewhere)
    Signal,
    /// `--max-jobs` dispatched and every result came back
    JobLimit,
    /// `--duration` elapsed
    Deadline,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Signal => "interrupted",
            StopReason::JobLimit => "job limit reached",
            StopReason::Deadline => "duration elapsed",
        })
    }
}

/// Summary of a finished run
#[derive(Debug)]
pub struct ControllerReport {
    pub dispatched: u64,
    pub completed: u64,
    pub failures: u64,
    pub requeued: u64,
    pub anomaly_count: u64,
    pub anomalies: Vec<Anomaly>,
    pub bytes_written: u64,
    pub actions: [ActionTotals; Action::COUNT],
    pub dirs: usize,
    pub files: usize,
    pub evicted: u64,
    pub abandoned: usize,
    pub duration: Duration,
    pub stop_reason: StopReason,
}

/// Owner of all coordination state
pub struct Controller {
    model: NamespaceModel,
    generator: JobGenerator,
    reconciler: ResponseReconciler,
    registry: WorkerRegistry,
    inbound: Arc<InboundQueue>,
    outbound: Arc<OutboundQueue>,
    shutdown: Shutdown,
    stats: Arc<ControllerStats>,
    idle_wait: Duration,
    max_jobs: Option<u64>,
    duration: Option<Duration>,
    op_log: Option<OperationLog>,
}

impl Controller {
    pub fn new(
        config: &ControllerConfig,
        model: NamespaceModel,
        inbound: Arc<InboundQueue>,
        outbound: Arc<OutboundQueue>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            model,
            generator: JobGenerator::new(&config.weights),
            reconciler: ResponseReconciler::new(),
            registry: WorkerRegistry::new(config.max_jobs_per_worker),
            inbound,
            outbound,
            shutdown,
            stats: Arc::new(ControllerStats::default()),
            idle_wait: config.idle_wait,
            max_jobs: config.max_jobs,
            duration: config.duration,
            op_log: None,
        }
    }

    /// Write a CSV row for every reconciled result
    pub fn with_operation_log(mut self, log: OperationLog) -> Self {
        self.op_log = Some(log);
        self
    }

    /// Counters for a progress display
    pub fn stats(&self) -> Arc<ControllerStats> {
        Arc::clone(&self.stats)
    }

    pub fn model(&self) -> &NamespaceModel {
        &self.model
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn generator(&self) -> &JobGenerator {
        &self.generator
    }

    pub fn reconciler(&self) -> &ResponseReconciler {
        &self.reconciler
    }

    /// Process one worker message
    ///
    /// Returns the reconciler's verdict for `job_done`. A duplicate connect
    /// is the only error.
    pub fn handle(&mut self, item: Inbound) -> std::result::Result<Option<Verdict>, ProtocolError> {
        let Inbound { worker, message, .. } = item;
        match message {
            WorkerMessage::Connect => {
                self.registry.connect(worker.clone())?;
                self.stats.set_workers(self.registry.worker_count());
                info!(worker = %worker, workers = self.registry.worker_count(), "Worker connected");
                Ok(None)
            }
            WorkerMessage::Disconnect => {
                self.disconnect(&worker);
                Ok(None)
            }
            WorkerMessage::JobDone { job_id, result } => {
                let job = self.registry.complete(&worker, &job_id);
                if job.is_none() {
                    warn!(
                        worker = %worker,
                        job = %job_id,
                        action = %result.action,
                        path = %result.target,
                        "Result for a job no longer tracked, reconciling anyway"
                    );
                }

                let verdict = self.reconciler.reconcile(&mut self.model, job.as_ref(), &result);

                let bytes = match result.action {
                    Action::Write if result.is_success() => result.data.length.unwrap_or(0),
                    _ => 0,
                };
                self.stats.record_result(
                    result.action,
                    result.is_success(),
                    verdict.is_anomaly(),
                    bytes,
                );
                self.stats.set_in_flight(self.registry.total_in_flight());

                if let Some(log) = self.op_log.as_mut() {
                    let record = OperationRecord::new(&worker, &job_id, job.as_ref(), &result, verdict);
                    if let Err(e) = log.record(&record) {
                        warn!(error = %e, "Operation log write failed, disabling it");
                        self.op_log = None;
                    }
                }
                Ok(Some(verdict))
            }
        }
    }

    fn disconnect(&mut self, worker: &WorkerId) {
        match self.registry.disconnect(worker) {
            Some(orphans) => {
                let count = orphans.len();
                self.generator.requeue(orphans);
                self.stats.record_requeue(count as u64);
                self.stats.set_workers(self.registry.worker_count());
                self.stats.set_in_flight(self.registry.total_in_flight());
                info!(worker = %worker, requeued = count, "Worker disconnected");
            }
            None => debug!(worker = %worker, "Disconnect from unregistered worker"),
        }
    }

    /// Process every queued inbound message
    pub fn drain_inbound(&mut self) -> std::result::Result<usize, ProtocolError> {
        let mut handled = 0;
        while let Some(item) = self.inbound.try_pop() {
            self.handle(item)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Generate a job for the least-loaded worker and queue it for sending
    ///
    /// `None` when no worker has spare capacity.
    pub fn dispatch_one(&mut self) -> Option<JobId> {
        let worker = self.registry.least_loaded()?;
        let job = self.generator.next_job(&mut self.model);
        let frame = job.frame();
        let id = job.id.clone();

        debug!(
            worker = %worker,
            job = %id,
            action = %job.action(),
            path = %job.target(),
            "Dispatching job"
        );

        self.registry.assign(&worker, job);
        self.outbound.push(Outbound { worker, frame });
        self.stats.record_dispatch();
        Some(id)
    }

    fn job_limit_reached(&self) -> bool {
        self.max_jobs
            .is_some_and(|max| self.stats.dispatched.load(Ordering::Relaxed) >= max)
    }

    /// Run until stopped
    ///
    /// A protocol error triggers the stop signal and is returned.
    pub async fn run(mut self) -> Result<ControllerReport> {
        let started = Instant::now();
        let deadline = self.duration.map(|d| started + d);

        info!(
            max_jobs = ?self.max_jobs,
            duration = ?self.duration,
            max_jobs_per_worker = self.registry.max_jobs_per_worker(),
            "Controller started"
        );

        let reason = loop {
            if self.shutdown.is_triggered() {
                break StopReason::Signal;
            }

            if let Err(e) = self.drain_inbound() {
                error!(error = %e, "Fatal protocol error");
                self.shutdown.trigger();
                self.flush_operation_log();
                return Err(e.into());
            }
            self.stats
                .set_queue_depths(self.inbound.len(), self.outbound.len());

            if deadline.is_some_and(|d| Instant::now() >= d) {
                break StopReason::Deadline;
            }

            if self.job_limit_reached() {
                if self.registry.total_in_flight() == 0 {
                    break StopReason::JobLimit;
                }
            } else if self.dispatch_one().is_some() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = self.inbound.notified() => {}
                _ = self.shutdown.wait() => {}
                _ = tokio::time::sleep(self.idle_wait) => {}
            }
        };

        self.shutdown.trigger();
        self.flush_operation_log();
        let report = self.report(started.elapsed(), reason);
        info!(
            reason = %reason,
            dispatched = report.dispatched,
            completed = report.completed,
            anomalies = report.anomaly_count,
            abandoned = report.abandoned,
            "Controller stopped"
        );
        Ok(report)
    }

    fn flush_operation_log(&mut self) {
        let Some(log) = self.op_log.as_mut() else {
            return;
        };
        match log.flush() {
            Ok(()) => info!(rows = log.rows(), "Operation log written"),
            Err(e) => warn!(error = %e, "Failed to flush operation log"),
        }
    }

    /// Summary of the run so far
    pub fn report(&self, duration: Duration, stop_reason: StopReason) -> ControllerReport {
        ControllerReport {
            dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            requeued: self.stats.requeued.load(Ordering::Relaxed),
            anomaly_count: self.reconciler.anomaly_count(),
            anomalies: self.reconciler.anomalies().to_vec(),
            bytes_written: self.stats.bytes_written.load(Ordering::Relaxed),
            actions: self.stats.action_totals(),
            dirs: self.model.dir_count(),
            files: self.model.file_count(),
            evicted: self.model.evicted_count(),
            abandoned: self.registry.total_in_flight(),
            duration,
            stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ActionWeights;
    use crate::model::{ModelLimits, NamePool};
    use crate::protocol::{ResultData, ResultMessage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn controller(config: ControllerConfig) -> Controller {
        let model = NamespaceModel::with_parts(
            ModelLimits::default(),
            NamePool::random(),
            StdRng::seed_from_u64(3),
        );
        Controller::new(
            &config,
            model,
            Arc::new(InboundQueue::new()),
            Arc::new(OutboundQueue::new()),
            Shutdown::new(),
        )
    }

    fn connect(ctl: &mut Controller, name: &str) -> WorkerId {
        let worker = WorkerId::new(name);
        ctl.handle(Inbound::new(worker.clone(), WorkerMessage::Connect))
            .unwrap();
        worker
    }

    #[test]
    fn test_no_dispatch_without_workers() {
        let mut ctl = controller(ControllerConfig::default());
        assert!(ctl.dispatch_one().is_none());
        assert!(ctl.outbound.is_empty());
    }

    #[test]
    fn test_duplicate_connect_is_fatal() {
        let mut ctl = controller(ControllerConfig::default());
        let w = connect(&mut ctl, "w1");
        let err = ctl.handle(Inbound::new(w, WorkerMessage::Connect)).unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateConnect { .. }));
    }

    #[test]
    fn test_dispatch_respects_cap() {
        let mut ctl = controller(ControllerConfig {
            max_jobs_per_worker: 2,
            ..Default::default()
        });
        connect(&mut ctl, "w1");
        assert!(ctl.dispatch_one().is_some());
        assert!(ctl.dispatch_one().is_some());
        assert!(ctl.dispatch_one().is_none());
        assert_eq!(ctl.outbound.len(), 2);
        assert_eq!(ctl.stats.dispatched.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_late_result_still_reconciled() {
        let mut ctl = controller(ControllerConfig::default());
        let w = connect(&mut ctl, "w1");
        let id = ctl.dispatch_one().unwrap();
        let frame = ctl.outbound.try_pop().unwrap().frame;
        let dir = frame.1.data.target.trim_start_matches('/').to_string();

        // Worker drops; its job is requeued before the result shows up
        ctl.handle(Inbound::new(w.clone(), WorkerMessage::Disconnect))
            .unwrap();
        assert_eq!(ctl.generator().requeued_len(), 1);

        let result = ResultMessage::success(
            Action::Mkdir,
            frame.1.data.target.clone(),
            ResultData {
                dirsize: Some(0),
                ..Default::default()
            },
        );
        let verdict = ctl
            .handle(Inbound::new(w, WorkerMessage::JobDone { job_id: id, result }))
            .unwrap();
        assert_eq!(verdict, Some(Verdict::Applied));
        assert!(ctl.model().directory(&dir).unwrap().on_disk);
    }

    fn mkdir_result(ctl: &mut Controller) -> (JobId, ResultMessage) {
        let id = ctl.dispatch_one().unwrap();
        let frame = ctl.outbound.try_pop().unwrap().frame;
        let result = ResultMessage::success(
            Action::Mkdir,
            frame.1.data.target.clone(),
            ResultData {
                dirsize: Some(0),
                ..Default::default()
            },
        );
        (id, result)
    }

    #[test]
    fn test_results_counted_per_action() {
        let mut ctl = controller(ControllerConfig::default());
        let w = connect(&mut ctl, "w1");

        let (id, result) = mkdir_result(&mut ctl);
        ctl.handle(Inbound::new(w.clone(), WorkerMessage::JobDone { job_id: id, result }))
            .unwrap();

        let (id, _) = mkdir_result(&mut ctl);
        let failed = ResultMessage::failure(Action::Stat, "/x/y", 13, "Permission denied", ResultData::default());
        ctl.handle(Inbound::new(w, WorkerMessage::JobDone { job_id: id, result: failed }))
            .unwrap();

        let progress = ctl.stats().snapshot(Duration::from_secs(1));
        assert_eq!(
            progress.actions[Action::Mkdir.index()],
            ActionTotals {
                succeeded: 1,
                failed: 0
            }
        );
        assert_eq!(progress.actions[Action::Stat.index()].failed, 1);
        assert_eq!(progress.actions[Action::Read.index()].total(), 0);
        assert_eq!(progress.failures, 1);

        let report = ctl.report(Duration::from_secs(1), StopReason::Signal);
        let total: u64 = report.actions.iter().map(ActionTotals::total).sum();
        assert_eq!(total, report.completed);
    }

    #[test]
    fn test_operation_log_gets_a_row_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.csv");
        let config = ControllerConfig {
            weights: ActionWeights::new([(Action::Mkdir, 100)]).unwrap(),
            ..Default::default()
        };
        let mut ctl = controller(config).with_operation_log(OperationLog::create(&path).unwrap());
        let w = connect(&mut ctl, "w1");

        for _ in 0..3 {
            let (id, result) = mkdir_result(&mut ctl);
            ctl.handle(Inbound::new(w.clone(), WorkerMessage::JobDone { job_id: id, result }))
                .unwrap();
        }
        ctl.flush_operation_log();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(&row[1], "w1");
            assert_eq!(&row[3], "mkdir");
            assert_eq!(&row[5], "success");
            assert_eq!(&row[7], "applied");
            assert!(row[8].parse::<u64>().is_ok());
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let ctl = controller(ControllerConfig {
            idle_wait: Duration::from_millis(5),
            ..Default::default()
        });
        let shutdown = ctl.shutdown.clone();
        let handle = tokio::spawn(ctl.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::Signal);
        assert_eq!(report.dispatched, 0);
    }

    #[tokio::test]
    async fn test_run_stops_at_deadline() {
        let ctl = controller(ControllerConfig {
            idle_wait: Duration::from_millis(5),
            duration: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        let report = tokio::time::timeout(Duration::from_secs(1), ctl.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::Deadline);
    }
}
