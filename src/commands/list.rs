//! List and remove handlers.

use anyhow::{Result, bail};
use chunkdl::{DownloadEngine, DownloadStatus};

use crate::output;

pub async fn run_list_command(
    engine: &DownloadEngine,
    all: bool,
    status: Option<DownloadStatus>,
) -> Result<()> {
    let downloads = engine.store().list(status, all).await?;
    if downloads.is_empty() {
        println!("No downloads");
        return Ok(());
    }
    for download in &downloads {
        println!("{}", output::render_download_row(download));
    }
    Ok(())
}

pub async fn run_remove_command(engine: &DownloadEngine, id: i64) -> Result<()> {
    if engine.orchestrator().active().is_active(id) {
        bail!("download #{id} is running; pause it first");
    }
    let download = engine.store().require(id).await?;
    engine.store().delete_download(id).await?;

    // The final file is kept; only the partial temp file goes.
    if download.status() != DownloadStatus::Completed {
        let temp = download.temp_file();
        if let Err(e) = tokio::fs::remove_file(&temp).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %temp.display(), error = %e, "failed to remove temp file");
        }
    }
    println!("Removed download #{id}");
    Ok(())
}
