//! Terminal output: batch progress bar and download listings.

use std::io::{self, IsTerminal};
use std::time::Duration;

use chunkdl::{BatchReport, Download, SchedulerEvent};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Whether to draw a progress bar on stderr.
pub fn should_use_progress(stderr_is_terminal: bool, quiet: bool) -> bool {
    stderr_is_terminal && !quiet && std::env::var("TERM").map_or(true, |term| term != "dumb")
}

/// Consumes scheduler events until the sender side is dropped.
///
/// Draws a bar when `enabled`; either way the terminal events are returned
/// so the caller can print a summary.
pub fn spawn_progress_ui(
    enabled: bool,
    total: usize,
    mut events: mpsc::UnboundedReceiver<SchedulerEvent>,
) -> JoinHandle<Vec<SchedulerEvent>> {
    tokio::spawn(async move {
        let bar = enabled.then(|| {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });

        let mut finished = Vec::new();
        while let Some(event) = events.recv().await {
            if let Some(bar) = &bar {
                match &event {
                    SchedulerEvent::Starting { id } => bar.set_message(format!("downloading #{id}")),
                    SchedulerEvent::Failed { id, error, .. } => {
                        bar.println(format!("#{id} failed: {error}"));
                        bar.inc(1);
                    }
                    SchedulerEvent::Completed { .. } | SchedulerEvent::Cancelled { .. } => {
                        bar.inc(1);
                    }
                }
            }
            if !matches!(event, SchedulerEvent::Starting { .. }) {
                finished.push(event);
            }
        }

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        finished
    })
}

/// A spinner for single long-running operations, hidden when not on a terminal.
pub fn spinner(message: &str, quiet: bool) -> ProgressBar {
    if !should_use_progress(io::stderr().is_terminal(), quiet) {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Prints one line per finished download and a totals line.
pub fn print_batch_summary(events: &[SchedulerEvent], report: BatchReport) {
    for event in events {
        match event {
            SchedulerEvent::Completed { id, path } => {
                println!("#{id} completed: {}", path.display());
            }
            SchedulerEvent::Failed { id, error, kind } => {
                println!("#{id} failed ({kind}): {error}");
            }
            SchedulerEvent::Cancelled { id, reason } => {
                println!("#{id} paused ({reason}); run `chunkdl resume {id}` to continue");
            }
            SchedulerEvent::Starting { .. } => {}
        }
    }
    println!(
        "{} completed, {} failed, {} paused",
        report.completed, report.failed, report.cancelled
    );
}

/// Formats a byte count with binary units.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// One listing row: id, status, progress, name.
pub fn render_download_row(download: &Download) -> String {
    let progress = match (download.known_size(), download.percent()) {
        (Some(size), Some(percent)) => format!(
            "{percent:5.1}% of {}",
            format_bytes(size)
        ),
        _ => format!("{} so far", format_bytes(download.downloaded_bytes())),
    };
    let name = download
        .title
        .clone()
        .unwrap_or_else(|| download.file_path.clone());
    let verified = if download.verified { " verified" } else { "" };
    format!(
        "{:>5}  {:<11}  {:<20}  {name}{verified}",
        download.id,
        download.status(),
        progress
    )
}
