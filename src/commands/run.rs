//! Get, resume and restart handlers.
//!
//! Downloads run through the engine's scheduler. Ctrl-C cancels every
//! running download; each one flushes its last checkpoint and is left
//! paused for a later `resume`.

use std::io::{self, IsTerminal};

use anyhow::{Result, bail};
use chunkdl::{BatchReport, DownloadEngine, DownloadOutcome, DownloadStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::output;

pub async fn run_get_command(engine: &DownloadEngine, id: i64, quiet: bool) -> Result<()> {
    let download = engine.store().require(id).await?;
    if download.status() == DownloadStatus::Completed {
        println!("#{id} is already completed: {}", download.file_path);
        return Ok(());
    }
    run_ids(engine, vec![id], quiet).await
}

pub async fn run_resume_command(
    engine: &DownloadEngine,
    id: Option<i64>,
    quiet: bool,
) -> Result<()> {
    match id {
        Some(id) => run_get_command(engine, id, quiet).await,
        None => {
            let ids: Vec<i64> = engine
                .store()
                .list_resumable()
                .await?
                .into_iter()
                .map(|d| d.id)
                .collect();
            if ids.is_empty() {
                println!("Nothing to resume");
                return Ok(());
            }
            run_ids(engine, ids, quiet).await
        }
    }
}

pub async fn run_restart_command(engine: &DownloadEngine, id: i64, quiet: bool) -> Result<()> {
    let interrupt = spawn_interrupt_handler(engine);
    let spinner = output::spinner(&format!("restarting #{id}"), quiet);
    let result = engine.restart(id).await;
    spinner.finish_and_clear();
    interrupt.abort();

    match result? {
        DownloadOutcome::Completed { path, bytes } => {
            println!("#{id} completed: {} ({})", path.display(), output::format_bytes(bytes));
            Ok(())
        }
        DownloadOutcome::Cancelled(reason) => {
            println!("#{id} paused ({reason}); run `chunkdl resume {id}` to continue");
            Ok(())
        }
    }
}

async fn run_ids(engine: &DownloadEngine, ids: Vec<i64>, quiet: bool) -> Result<()> {
    let total = ids.len();
    let (tx, rx) = mpsc::unbounded_channel();
    let progress = output::spawn_progress_ui(
        output::should_use_progress(io::stderr().is_terminal(), quiet),
        total,
        rx,
    );
    let interrupt = spawn_interrupt_handler(engine);

    info!(total, max_concurrent = engine.max_concurrent(), "running downloads");
    let report = engine.run_batch(ids, Some(tx)).await;
    interrupt.abort();
    let report: BatchReport = report?;

    let finished = progress.await.unwrap_or_default();
    if !quiet {
        output::print_batch_summary(&finished, report);
    }
    if report.failed > 0 {
        bail!("{} of {} downloads failed", report.failed, report.total());
    }
    Ok(())
}

fn spawn_interrupt_handler(engine: &DownloadEngine) -> JoinHandle<()> {
    let engine = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let cancelled = engine.cancel_all();
            warn!(cancelled, "interrupted, pausing running downloads");
        }
    })
}
