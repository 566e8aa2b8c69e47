//! Progress reporting for the controller
//!
//! Provides a live spinner using indicatif and the end-of-run summary.

use crate::dispatcher::{ActionTotals, ControllerProgress, ControllerReport, StopReason};
use crate::protocol::Action;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Anomalies listed individually in the summary
const SUMMARY_ANOMALY_LINES: usize = 20;

/// Spinner showing controller counters
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        if let Ok(spinner) = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}\n  {prefix:.dim}")
        {
            bar.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &ControllerProgress) {
        let msg = format!(
            "Workers: {} | In flight: {} | Queued: {}/{} | Done: {} ({:.0}/s) | Failed: {} | Anomalies: {} | Written: {}",
            progress.workers,
            format_number(progress.in_flight),
            format_number(progress.inbound_depth),
            format_number(progress.outbound_depth),
            format_number(progress.completed),
            progress.jobs_per_second(),
            format_number(progress.failures),
            format_number(progress.anomalies),
            format_size(progress.bytes_written, BINARY),
        );
        self.bar.set_message(msg);
        self.bar.set_prefix(action_line(&progress.actions));
    }

    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, ch) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `mkdir 12/0  touch 40/1 ...` for actions seen so far, as succeeded/failed
fn action_line(actions: &[ActionTotals; Action::COUNT]) -> String {
    Action::ALL
        .iter()
        .zip(actions)
        .filter(|(_, totals)| totals.total() > 0)
        .map(|(action, totals)| {
            format!(
                "{} {}/{}",
                action,
                format_number(totals.succeeded),
                format_number(totals.failed)
            )
        })
        .collect::<Vec<_>>()
        .join("  ")
}

/// Print the end-of-run summary
pub fn print_summary(report: &ControllerReport) {
    let secs = report.duration.as_secs_f64();
    let rate = if secs > 0.0 {
        report.completed as f64 / secs
    } else {
        0.0
    };

    let title = match report.stop_reason {
        StopReason::Signal => style("Run Interrupted").yellow().bold(),
        _ => style("Run Complete").green().bold(),
    };

    println!();
    println!("{} ({})", title, report.stop_reason);
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Dispatched:").bold(), format_number(report.dispatched));
    println!(
        "  {} {} ({:.0} jobs/sec)",
        style("Completed:").bold(),
        format_number(report.completed),
        rate
    );
    println!("  {} {}", style("Failed:").bold(), format_number(report.failures));
    println!("  {} {}", style("Requeued:").bold(), format_number(report.requeued));
    if report.abandoned > 0 {
        println!("  {} {}", style("Abandoned:").bold(), report.abandoned);
    }
    println!(
        "  {} {} dirs, {} files ({} evicted)",
        style("Model:").bold(),
        format_number(report.dirs as u64),
        format_number(report.files as u64),
        report.evicted
    );
    println!(
        "  {} {}",
        style("Written:").bold(),
        format_size(report.bytes_written, BINARY)
    );
    println!("  {} {:.1}s", style("Duration:").bold(), secs);

    if report.actions.iter().any(|totals| totals.total() > 0) {
        println!("  {}", style("Operations:").bold());
        println!(
            "    {:<14} {:>12} {:>12}",
            style("action").dim(),
            style("succeeded").dim(),
            style("failed").dim()
        );
        for (action, totals) in Action::ALL.iter().zip(&report.actions) {
            if totals.total() == 0 {
                continue;
            }
            println!(
                "    {:<14} {:>12} {:>12}",
                action.as_str(),
                format_number(totals.succeeded),
                format_number(totals.failed)
            );
        }
    }

    if report.anomaly_count > 0 {
        println!(
            "  {} {}",
            style("Anomalies:").red().bold(),
            format_number(report.anomaly_count)
        );
        for anomaly in report.anomalies.iter().take(SUMMARY_ANOMALY_LINES) {
            println!(
                "    {} {} {} {}",
                crate::protocol::timestamp::format(&anomaly.timestamp),
                style(anomaly.verdict).red(),
                anomaly.action,
                anomaly.target
            );
        }
        if report.anomaly_count as usize > SUMMARY_ANOMALY_LINES {
            println!("    {}", style("...").dim());
        }
    } else {
        println!("  {} none", style("Anomalies:").green().bold());
    }
    println!();
}

/// Print a header at the start of the run
pub fn print_header(listen: &str, max_dirs: usize, max_jobs_per_worker: usize) {
    println!();
    println!(
        "{} {}",
        style("nfs-dynamo").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Listening:").bold(), listen);
    println!("  {} {}", style("Max dirs:").bold(), max_dirs);
    println!("  {} {}", style("Jobs/worker:").bold(), max_jobs_per_worker);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_action_line_skips_idle_actions() {
        let mut actions = [ActionTotals::default(); Action::COUNT];
        assert_eq!(action_line(&actions), "");

        actions[Action::Touch.index()] = ActionTotals {
            succeeded: 1500,
            failed: 2,
        };
        actions[Action::RenameExist.index()].failed = 7;
        assert_eq!(action_line(&actions), "touch 1,500/2  rename_exist 0/7");
    }
}
