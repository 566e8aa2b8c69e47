//! nfs-dynamo - Distributed Filesystem Stress Tester
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use nfs_dynamo::config::{CliArgs, Command, ControllerConfig, LockingMode, WorkerConfig};
use nfs_dynamo::dispatcher::{Controller, InboundQueue, OperationLog, OutboundQueue, Router};
use nfs_dynamo::lock::{LockCoordinator, LockStore, MemoryLockStore, RedisLockConfig, RedisLockStore};
use nfs_dynamo::progress::{print_header, print_summary, ProgressReporter};
use nfs_dynamo::shutdown::Shutdown;
use nfs_dynamo::worker::{JobExecutor, Locking, Mounter, StaticMounter, WorkerClient};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status when the run finished but found anomalies
const EXIT_ANOMALIES: u8 = 2;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        signal.trigger();
    })
    .context("Failed to set signal handler")?;

    match &args.command {
        Command::Control(control) => {
            let config = ControllerConfig::from_args(control, args.quiet, args.verbose)
                .context("Invalid configuration")?;
            runtime.block_on(run_controller(config, shutdown))
        }
        Command::Work(work) => {
            let config =
                WorkerConfig::from_args(work, args.verbose).context("Invalid configuration")?;
            runtime.block_on(run_worker(config, shutdown))
        }
    }
}

async fn run_controller(config: ControllerConfig, shutdown: Shutdown) -> Result<ExitCode> {
    let model = config
        .build_model()
        .context("Failed to build namespace model")?;

    let op_log = match &config.op_log {
        Some(path) => {
            info!(path = %path.display(), "Logging every operation");
            Some(OperationLog::create(path).with_context(|| {
                format!("Failed to create operation log {}", path.display())
            })?)
        }
        None => None,
    };

    let router = Router::bind(config.listen)
        .await
        .context("Failed to start listener")?;
    let local = router.local_addr().context("Failed to read listen address")?;

    if config.show_progress {
        print_header(
            &local.to_string(),
            config.limits.max_dirs,
            config.max_jobs_per_worker,
        );
    }
    info!(listen = %local, "Waiting for workers");

    let inbound = Arc::new(InboundQueue::new());
    let outbound = Arc::new(OutboundQueue::new());
    let router = router.start(
        Arc::clone(&inbound),
        Arc::clone(&outbound),
        shutdown.clone(),
        config.inbound_handlers,
        config.outbound_handlers,
    );

    let mut controller = Controller::new(&config, model, inbound, outbound, shutdown.clone());
    if let Some(log) = op_log {
        controller = controller.with_operation_log(log);
    }

    let ticker = if config.show_progress {
        let stats = controller.stats();
        let stop = shutdown.clone();
        let started = Instant::now();
        Some(tokio::spawn(async move {
            let reporter = ProgressReporter::new();
            reporter.set_status("Waiting for workers...");
            loop {
                tokio::select! {
                    _ = stop.wait() => break,
                    _ = tokio::time::sleep(PROGRESS_INTERVAL) => {
                        reporter.update(&stats.snapshot(started.elapsed()));
                    }
                }
            }
            reporter.finish_and_clear();
        }))
    } else {
        None
    };

    let report = controller.run().await;
    shutdown.trigger();

    if let Some(ticker) = ticker {
        if let Err(e) = ticker.await {
            warn!(error = %e, "Progress display failed");
        }
    }

    let routed = router.join().await;
    let report = report.context("Controller failed")?;
    routed.context("Router failed")?;

    print_summary(&report);

    if report.anomaly_count > 0 {
        info!(anomalies = report.anomaly_count, "Run finished with anomalies");
        return Ok(ExitCode::from(EXIT_ANOMALIES));
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_worker(config: WorkerConfig, shutdown: Shutdown) -> Result<ExitCode> {
    let mut mounter =
        StaticMounter::new(config.mounts.clone()).context("Invalid mount points")?;
    mounter.mount_all().context("Mount points not usable")?;

    let locking = match config.locking {
        LockingMode::Off => Locking::Off,
        LockingMode::Native => Locking::Native,
        LockingMode::Application => {
            let store: Arc<dyn LockStore> = match &config.redis_url {
                Some(url) => Arc::new(
                    RedisLockStore::connect(RedisLockConfig::with_url(url))
                        .await
                        .context("Failed to connect to lock store")?,
                ),
                None => {
                    warn!("No --redis given, byte-range locks only cover this worker");
                    Arc::new(MemoryLockStore::new())
                }
            };
            Locking::Application(LockCoordinator::for_current_process(store))
        }
    };

    let executor = JobExecutor::new(Arc::new(mounter), locking, config.max_write_offset);
    let client = WorkerClient::new(config, executor, shutdown);
    let summary = client.run().await.context("Worker failed")?;

    info!(
        received = summary.received,
        succeeded = summary.succeeded,
        failed = summary.failed,
        secs = summary.duration.as_secs_f64(),
        "Worker finished"
    );
    Ok(ExitCode::SUCCESS)
}

/// Setup logging based on verbosity
fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("nfs_dynamo=debug,warn")
    } else {
        EnvFilter::new("nfs_dynamo=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
