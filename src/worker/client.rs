//! Worker side of the wire protocol
//!
//! Connects to the controller, announces itself, runs every job it receives
//! (at most `concurrency` at a time) and streams `job_done` results back.

use super::executor::JobExecutor;
use crate::config::WorkerConfig;
use crate::error::{ProtocolError, Result, TransportError, WorkerError};
use crate::protocol::{JobFrame, WorkerMessage};
use crate::shutdown::Shutdown;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Results buffered ahead of the socket writer
const RESULT_CHANNEL_CAPACITY: usize = 1024;

/// Counters for one worker session
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub received: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
}

/// Final summary of a worker session
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub duration: Duration,
    /// Jobs still running when the session ended
    pub abandoned: usize,
}

pub struct WorkerClient {
    config: WorkerConfig,
    executor: Arc<JobExecutor>,
    shutdown: Shutdown,
    stats: Arc<WorkerStats>,
}

impl WorkerClient {
    pub fn new(config: WorkerConfig, executor: JobExecutor, shutdown: Shutdown) -> Self {
        Self {
            config,
            executor: Arc::new(executor),
            shutdown,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Serve jobs until the controller hangs up or the stop signal fires
    pub async fn run(&self) -> Result<WorkerSummary> {
        let start = Instant::now();
        let addr = self.config.controller.as_str();

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not set TCP_NODELAY");
        }
        let (read, write) = stream.into_split();

        let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let sender = tokio::spawn(send_loop(write, results_rx, addr.to_string()));
        results_tx
            .send(WorkerMessage::Connect)
            .await
            .map_err(|_| WorkerError::ResultChannelClosed)?;
        info!(controller = %addr, concurrency = self.config.concurrency, "Connected to controller");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut running = JoinSet::new();
        let mut lines = BufReader::new(read).lines();

        let outcome: Result<()> = loop {
            let line = tokio::select! {
                _ = self.shutdown.wait() => break Ok(()),
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Controller closed the connection");
                    break Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Connection to controller failed");
                    break Ok(());
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let JobFrame(job_id, payload) = match serde_json::from_str(&line) {
                Ok(frame) => frame,
                Err(e) => {
                    break Err(ProtocolError::Malformed {
                        peer: addr.to_string(),
                        reason: e.to_string(),
                    }
                    .into())
                }
            };
            self.stats.received.fetch_add(1, Ordering::Relaxed);

            let permit = tokio::select! {
                _ = self.shutdown.wait() => break Ok(()),
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Err(WorkerError::ResultChannelClosed.into()),
                },
            };

            let executor = Arc::clone(&self.executor);
            let stats = Arc::clone(&self.stats);
            let tx = results_tx.clone();
            running.spawn(async move {
                let result = executor.execute(&payload).await;
                if result.is_success() {
                    stats.succeeded.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                }
                debug!(job = %job_id, action = %result.action, success = result.is_success(), "Job finished");
                if tx.send(WorkerMessage::JobDone { job_id, result }).await.is_err() {
                    debug!("Result dropped, sender gone");
                }
                drop(permit);
            });

            while running.try_join_next().is_some() {}
        };

        let abandoned = running.len();
        running.shutdown().await;

        let _ = results_tx.send(WorkerMessage::Disconnect).await;
        drop(results_tx);
        match sender.await {
            Ok(Err(e)) => warn!(error = %e, "Result sender stopped early"),
            Err(e) => warn!(error = %e, "Result sender task failed"),
            Ok(Ok(())) => {}
        }

        outcome?;

        let summary = WorkerSummary {
            received: self.stats.received.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            duration: start.elapsed(),
            abandoned,
        };
        info!(
            received = summary.received,
            succeeded = summary.succeeded,
            failed = summary.failed,
            abandoned,
            "Worker session ended"
        );
        Ok(summary)
    }
}

/// Write queued messages to the controller, one JSON document per line
async fn send_loop(
    mut write: OwnedWriteHalf,
    mut messages: mpsc::Receiver<WorkerMessage>,
    peer: String,
) -> Result<()> {
    while let Some(message) = messages.recv().await {
        let mut line = serde_json::to_vec(&message).map_err(ProtocolError::from)?;
        line.push(b'\n');
        write
            .write_all(&line)
            .await
            .map_err(|e| TransportError::SendFailed {
                peer: peer.clone(),
                reason: e.to_string(),
            })?;
    }
    let _ = write.shutdown().await;
    Ok(())
}
