//! Verify command handler.

use anyhow::{Result, bail};
use chunkdl::{DownloadEngine, DownloadError, VerifyOutcome};

use crate::output;

pub async fn run_verify_command(
    engine: &DownloadEngine,
    id: Option<i64>,
    fix: bool,
    quiet: bool,
) -> Result<()> {
    let results = match id {
        Some(id) => {
            let spinner = output::spinner(&format!("verifying #{id}"), quiet);
            let result = engine.verify(id, fix).await;
            spinner.finish_and_clear();
            vec![(id, result)]
        }
        None => engine.verify_all(fix).await?,
    };

    if results.is_empty() {
        println!("No completed downloads to verify");
        return Ok(());
    }

    let mut bad = 0usize;
    for (id, result) in &results {
        if !print_result(*id, result) {
            bad += 1;
        }
    }
    if bad > 0 {
        bail!("{bad} of {} downloads failed verification", results.len());
    }
    Ok(())
}

/// Prints one result; returns false for anything other than a match.
fn print_result(id: i64, result: &Result<VerifyOutcome, DownloadError>) -> bool {
    match result {
        Ok(VerifyOutcome::Verified) => {
            println!("#{id} OK");
            true
        }
        Ok(VerifyOutcome::Mismatch { expected, actual }) => {
            println!("#{id} MISMATCH expected {expected}, got {actual}");
            false
        }
        Ok(VerifyOutcome::Unverifiable { reason }) => {
            println!("#{id} UNVERIFIABLE {reason}");
            false
        }
        Err(e) => {
            println!("#{id} ERROR {e}");
            false
        }
    }
}
