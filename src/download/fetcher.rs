//! Range fetcher: executes one HTTP transfer into the temp file and
//! checkpoints progress through the repository.
//!
//! Chunked transfers seek the preallocated temp file to the chunk's resume
//! offset and request only the missing bytes. Simple transfers stream the
//! whole body after sniffing its first bytes for an HTML or challenge page.
//!
//! Progress is checkpointed every `checkpoint_interval` bytes, after the
//! written bytes were flushed and synced, so a persisted offset never runs
//! ahead of the data on disk. A crash loses at most one interval.

use std::io::SeekFrom;
use std::path::Path;

use futures_util::StreamExt;
use reqwest::{Method, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use super::cancel::CancelScope;
use super::client::{HttpClient, content_range, content_type, header_content_length};
use super::constants::{SNIFF_LEN, WRITE_BUFFER_SIZE};
use super::error::DownloadError;
use crate::store::{Chunk, Download, DownloadRepository, StoreError};

/// Lowercase markers that betray an HTML, challenge or error page.
const HTML_MARKERS: &[&str] = &[
    "<!doctype html",
    "<html",
    "<head",
    "<body",
    "<title",
    "<script",
    "cloudflare",
    "captcha",
    "access denied",
    "error 403",
    "error 404",
];

/// Everything a transfer needs besides its target.
#[derive(Clone, Copy)]
pub struct FetchContext<'a> {
    /// Where progress is checkpointed.
    pub repo: &'a dyn DownloadRepository,
    /// Shared HTTP client.
    pub client: &'a HttpClient,
    /// Pause and timeout scope of the running download.
    pub scope: &'a CancelScope,
    /// Bytes between persisted checkpoints.
    pub checkpoint_interval: u64,
}

/// Returns the first HTML/challenge marker found in `prefix`, if any.
#[must_use]
pub fn detect_html_marker(prefix: &[u8]) -> Option<&'static str> {
    let text = String::from_utf8_lossy(prefix).to_ascii_lowercase();
    HTML_MARKERS
        .iter()
        .copied()
        .find(|marker| text.contains(marker))
}

/// Fetches the missing bytes of one chunk into the shared temp file.
///
/// The chunk is reloaded from the repository on every call, so a retry
/// resumes from the last checkpoint rather than from where the previous
/// attempt thought it was. The download's aggregate progress is the sum of
/// every other chunk's progress plus this chunk's bytes.
///
/// A 206 reply must start at the resume offset. A 200 reply is accepted only
/// when resuming from absolute offset 0, and is cut off at the chunk end.
///
/// # Errors
///
/// - [`DownloadError::RangeIgnored`] when the server ignores the range
/// - [`DownloadError::Truncated`] when the body ends early (progress is kept)
/// - [`DownloadError::Cancelled`] on pause or timeout (progress is kept)
/// - [`DownloadError::Io`] / [`DownloadError::Store`] for local failures
#[instrument(skip(ctx, url, temp_path))]
pub async fn fetch_chunk(
    ctx: FetchContext<'_>,
    download_id: i64,
    chunk_id: i64,
    url: &str,
    temp_path: &Path,
) -> Result<(), DownloadError> {
    let chunks = ctx.repo.get_chunks(download_id).await?;
    let chunk = chunks
        .iter()
        .find(|c| c.id == chunk_id)
        .cloned()
        .ok_or(StoreError::ChunkNotFound(chunk_id))?;
    if chunk.is_completed() {
        return Ok(());
    }

    let base: u64 = chunks
        .iter()
        .filter(|c| c.id != chunk_id)
        .map(Chunk::progress_bytes)
        .sum();
    let len = chunk.len();
    let already = chunk.downloaded_bytes().min(len);

    if already >= len {
        ctx.repo
            .update_progress_atomic(chunk_id, len, download_id, base + len)
            .await?;
        ctx.repo.mark_chunk_completed(chunk_id).await?;
        return Ok(());
    }

    let offset = chunk.resume_offset();
    let range = chunk.range_header();
    debug!(index = chunk.chunk_index, %range, "requesting chunk");

    let response = ctx
        .client
        .send(Method::GET, url, Some(&range), ctx.scope)
        .await?;

    match response.status() {
        StatusCode::PARTIAL_CONTENT => {
            let start = content_range(&response).map(|r| r.start);
            if start != Some(offset) {
                return Err(DownloadError::range_ignored(
                    url,
                    206,
                    format!("Content-Range starts at {start:?}, expected {offset}"),
                ));
            }
        }
        StatusCode::OK if offset == 0 => {
            debug!("server sent the full body for a range starting at 0");
        }
        status => {
            return Err(DownloadError::range_ignored(
                url,
                status.as_u16(),
                format!("full body returned for a range starting at {offset}"),
            ));
        }
    }

    let mut file = OpenOptions::new()
        .write(true)
        .open(temp_path)
        .await
        .map_err(|e| DownloadError::io(temp_path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| DownloadError::io(temp_path, e))?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

    let mut stream = response.bytes_stream();
    let mut written = already;
    let mut since_checkpoint = 0u64;

    let outcome: Result<(), DownloadError> = loop {
        let item = match ctx.scope.run(stream.next()).await {
            Ok(item) => item,
            Err(cancelled) => break Err(cancelled),
        };
        let Some(item) = item else {
            break Ok(());
        };
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(e) => break Err(DownloadError::network(url, e)),
        };

        let take = usize::try_from(len - written).map_or(bytes.len(), |left| left.min(bytes.len()));
        writer
            .write_all(&bytes[..take])
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        written += take as u64;
        since_checkpoint += take as u64;

        if written >= len {
            break Ok(());
        }
        if since_checkpoint >= ctx.checkpoint_interval {
            sync(&mut writer, temp_path).await?;
            let saved = ctx
                .repo
                .update_progress_atomic(chunk_id, written, download_id, base + written)
                .await;
            if checkpoint_saved(saved, written)? {
                since_checkpoint = 0;
            }
        }
    };

    if let Err(error) = outcome {
        // Keep what reached the file so the next attempt resumes after it.
        match sync(&mut writer, temp_path).await {
            Ok(()) => {
                if let Err(e) = ctx
                    .repo
                    .update_progress_atomic(chunk_id, written, download_id, base + written)
                    .await
                {
                    warn!(error = %e, written, "failed to checkpoint interrupted chunk");
                }
            }
            Err(e) => warn!(error = %e, "failed to flush interrupted chunk"),
        }
        return Err(error);
    }

    sync(&mut writer, temp_path).await?;

    if written < len {
        ctx.repo
            .update_progress_atomic(chunk_id, written, download_id, base + written)
            .await?;
        return Err(DownloadError::truncated(url, len - already, written - already));
    }

    ctx.repo
        .update_progress_atomic(chunk_id, len, download_id, base + len)
        .await?;
    ctx.repo.mark_chunk_completed(chunk_id).await?;
    debug!(index = chunk.chunk_index, bytes = len - already, "chunk completed");
    Ok(())
}

/// Streams the whole resource into a fresh temp file.
///
/// Rejects a `text/html` Content-Type and sniffs the first [`SNIFF_LEN`]
/// bytes for HTML/challenge markers before the temp file is created, so a
/// mismatch leaves nothing on disk. When the response carries a
/// Content-Length, it becomes the download's recorded size.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// - [`DownloadError::ContentMismatch`] for an HTML/challenge page
/// - [`DownloadError::SizeMismatch`] when more bytes arrive than expected
/// - [`DownloadError::Truncated`] when fewer arrive
/// - [`DownloadError::Cancelled`] on pause or timeout
/// - [`DownloadError::Io`] / [`DownloadError::Store`] for local failures
#[instrument(skip(ctx, download, url, temp_path), fields(download_id = download.id))]
pub async fn fetch_whole(
    ctx: FetchContext<'_>,
    download: &Download,
    url: &str,
    temp_path: &Path,
) -> Result<u64, DownloadError> {
    let response = ctx.client.send(Method::GET, url, None, ctx.scope).await?;

    if response.status() != StatusCode::OK {
        return Err(DownloadError::content_mismatch(
            url,
            format!("unexpected HTTP {} for a full download", response.status().as_u16()),
        ));
    }
    if content_type(&response).as_deref() == Some("text/html") {
        return Err(DownloadError::content_mismatch(url, "Content-Type text/html"));
    }

    let expected = header_content_length(&response).or_else(|| download.known_size());
    let mut stream = response.bytes_stream();

    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    while prefix.len() < SNIFF_LEN {
        match ctx.scope.run(stream.next()).await? {
            Some(Ok(bytes)) => prefix.extend_from_slice(&bytes),
            Some(Err(e)) => return Err(DownloadError::network(url, e)),
            None => break,
        }
    }
    if let Some(marker) = detect_html_marker(&prefix[..prefix.len().min(SNIFF_LEN)]) {
        return Err(DownloadError::content_mismatch(
            url,
            format!("body contains {marker:?}"),
        ));
    }

    if let Some(parent) = temp_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }
    let file = File::create(temp_path)
        .await
        .map_err(|e| DownloadError::io(temp_path, e))?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

    ctx.repo.update_progress(download.id, 0).await?;
    if let Some(size) = expected
        && download.known_size() != Some(size)
    {
        ctx.repo.update_size(download.id, size).await?;
    }

    if let Some(limit) = expected
        && prefix.len() as u64 > limit
    {
        return Err(DownloadError::size_mismatch(temp_path, limit, prefix.len() as u64));
    }
    writer
        .write_all(&prefix)
        .await
        .map_err(|e| DownloadError::io(temp_path, e))?;
    let mut written = prefix.len() as u64;
    let mut since_checkpoint = written;

    let outcome: Result<(), DownloadError> = loop {
        let bytes = match ctx.scope.run(stream.next()).await {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(e))) => break Err(DownloadError::network(url, e)),
            Ok(None) => break Ok(()),
            Err(cancelled) => break Err(cancelled),
        };

        if let Some(limit) = expected
            && written + bytes.len() as u64 > limit
        {
            return Err(DownloadError::size_mismatch(
                temp_path,
                limit,
                written + bytes.len() as u64,
            ));
        }

        writer
            .write_all(&bytes)
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        written += bytes.len() as u64;
        since_checkpoint += bytes.len() as u64;

        if since_checkpoint >= ctx.checkpoint_interval {
            sync(&mut writer, temp_path).await?;
            let saved = ctx.repo.update_progress(download.id, written).await;
            if checkpoint_saved(saved, written)? {
                since_checkpoint = 0;
            }
        }
    };

    if let Err(error) = outcome {
        match sync(&mut writer, temp_path).await {
            Ok(()) => {
                if let Err(e) = ctx.repo.update_progress(download.id, written).await {
                    warn!(error = %e, written, "failed to checkpoint interrupted transfer");
                }
            }
            Err(e) => warn!(error = %e, "failed to flush interrupted transfer"),
        }
        return Err(error);
    }

    sync(&mut writer, temp_path).await?;

    match expected {
        Some(size) if written < size => {
            ctx.repo.update_progress(download.id, written).await?;
            return Err(DownloadError::truncated(url, size, written));
        }
        Some(_) => {}
        None => ctx.repo.update_size(download.id, written).await?,
    }
    ctx.repo.update_progress(download.id, written).await?;

    debug!(bytes = written, "full transfer completed");
    Ok(written)
}

/// Flushes buffered bytes and syncs them to disk.
async fn sync(writer: &mut BufWriter<File>, path: &Path) -> Result<(), DownloadError> {
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    writer
        .get_mut()
        .sync_data()
        .await
        .map_err(|e| DownloadError::io(path, e))
}

/// Interprets the result of a periodic checkpoint write.
///
/// A busy or locked database defers the checkpoint instead of failing the
/// transfer: the bytes are already synced and the next checkpoint covers
/// them. Returns whether the checkpoint was persisted.
fn checkpoint_saved(result: Result<(), StoreError>, written: u64) -> Result<bool, DownloadError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_busy_or_locked() => {
            warn!(error = %e, written, "database busy, checkpoint deferred");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::store::{DownloadStatus, NewDownload, PlannedChunk, Store, StoreDbErrorKind};
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    struct Fixture {
        store: Store,
        client: HttpClient,
        scope: CancelScope,
        _dir: TempDir,
        dest: std::path::PathBuf,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let dest = dir.path().join("out.bin");
            Self {
                store: Store::new(Database::new_in_memory().await.unwrap()),
                client: HttpClient::with_defaults().unwrap(),
                scope: CancelScope::default(),
                _dir: dir,
                dest,
            }
        }

        fn ctx(&self) -> FetchContext<'_> {
            FetchContext {
                repo: &self.store,
                client: &self.client,
                scope: &self.scope,
                checkpoint_interval: 4,
            }
        }

        async fn download(&self, url: &str, size: Option<u64>) -> Download {
            let mut new = NewDownload::new("feedface", url, &self.dest);
            new.size = size;
            let id = self.store.create(&new).await.unwrap();
            self.store
                .update_status(id, DownloadStatus::Downloading, None)
                .await
                .unwrap();
            self.store.require(id).await.unwrap()
        }

        async fn chunked(&self, url: &str, plan: &[PlannedChunk], size: u64) -> (Download, Vec<Chunk>) {
            let download = self.download(url, Some(size)).await;
            let chunks = self.store.create_chunks(download.id, plan).await.unwrap();
            let file = std::fs::File::create(download.temp_file()).unwrap();
            file.set_len(size).unwrap();
            (download, chunks)
        }
    }

    fn plan_two() -> Vec<PlannedChunk> {
        vec![
            PlannedChunk { index: 0, start: 0, end: 9 },
            PlannedChunk { index: 1, start: 10, end: 19 },
        ]
    }

    // ==================== Sniffing Tests ====================

    #[test]
    fn test_detect_html_marker_case_insensitive() {
        assert_eq!(
            detect_html_marker(b"<!DOCTYPE html><html>"),
            Some("<!doctype html")
        );
        assert_eq!(detect_html_marker(b"Checking your browser... Cloudflare"), Some("cloudflare"));
        assert_eq!(detect_html_marker(b"ERROR 404 not here"), Some("error 404"));
    }

    #[test]
    fn test_detect_html_marker_ignores_binary() {
        assert_eq!(detect_html_marker(&[0x25, 0x50, 0x44, 0x46, 0x00, 0xff, 0x13]), None);
        assert_eq!(detect_html_marker(b"PK\x03\x04 zip payload"), None);
    }

    // ==================== Chunk Tests ====================

    #[tokio::test]
    async fn test_fetch_chunk_resumes_from_checkpoint() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let fx = Fixture::new().await;
        let url = format!("{}/f", server.uri());
        let (download, chunks) = fx.chunked(&url, &plan_two(), 20).await;
        fx.store
            .update_progress_atomic(chunks[1].id, 4, download.id, 4)
            .await
            .unwrap();

        Mock::given(method("GET"))
            .and(path("/f"))
            .and(header("Range", "bytes=14-19"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 14-19/20")
                    .set_body_bytes(b"abcdef".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        fetch_chunk(fx.ctx(), download.id, chunks[1].id, &url, &download.temp_file())
            .await
            .unwrap();

        let chunk = fx.store.get_chunk(chunks[1].id).await.unwrap();
        assert!(chunk.is_completed());
        assert_eq!(chunk.downloaded_bytes(), 10);
        assert_eq!(fx.store.require(download.id).await.unwrap().downloaded_bytes(), 10);

        let bytes = std::fs::read(download.temp_file()).unwrap();
        assert_eq!(&bytes[14..20], b"abcdef");
    }

    #[tokio::test]
    async fn test_fetch_chunk_rejects_full_body_mid_file() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let fx = Fixture::new().await;
        let url = format!("{}/f", server.uri());
        let (download, chunks) = fx.chunked(&url, &plan_two(), 20).await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 20]))
            .mount(&server)
            .await;

        let err = fetch_chunk(fx.ctx(), download.id, chunks[1].id, &url, &download.temp_file())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::RangeIgnored { status: 200, .. }));
        assert!(!fx.store.get_chunk(chunks[1].id).await.unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_fetch_chunk_accepts_full_body_at_offset_zero() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let fx = Fixture::new().await;
        let url = format!("{}/f", server.uri());
        let (download, chunks) = fx.chunked(&url, &plan_two(), 20).await;
        let body: Vec<u8> = (0u8..20).collect();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        fetch_chunk(fx.ctx(), download.id, chunks[0].id, &url, &download.temp_file())
            .await
            .unwrap();

        let bytes = std::fs::read(download.temp_file()).unwrap();
        assert_eq!(&bytes[..10], &body[..10]);
        assert_eq!(&bytes[10..], &[0u8; 10]);
    }

    #[tokio::test]
    async fn test_fetch_chunk_short_body_keeps_progress() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let fx = Fixture::new().await;
        let url = format!("{}/f", server.uri());
        let (download, chunks) = fx.chunked(&url, &plan_two(), 20).await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-9/20")
                    .set_body_bytes(b"0123456".to_vec()),
            )
            .mount(&server)
            .await;

        let err = fetch_chunk(fx.ctx(), download.id, chunks[0].id, &url, &download.temp_file())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DownloadError::Truncated {
                expected: 10,
                received: 7,
                ..
            }
        ));
        let chunk = fx.store.get_chunk(chunks[0].id).await.unwrap();
        assert_eq!(chunk.downloaded_bytes(), 7);
        assert_eq!(chunk.range_header(), "bytes=7-9");
    }

    #[tokio::test]
    async fn test_fetch_chunk_cancelled_before_request() {
        let fx = Fixture::new().await;
        let (download, chunks) = fx.chunked("http://127.0.0.1:9/f", &plan_two(), 20).await;
        fx.scope.token().cancel();

        let err = fetch_chunk(
            fx.ctx(),
            download.id,
            chunks[0].id,
            "http://127.0.0.1:9/f",
            &download.temp_file(),
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
    }

    // ==================== Whole-file Tests ====================

    #[tokio::test]
    async fn test_fetch_whole_html_leaves_no_temp_file() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let fx = Fixture::new().await;
        let url = format!("{}/f", server.uri());
        let download = fx.download(&url, None).await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(b"<!DOCTYPE html><p>blocked</p>".to_vec(), "application/octet-stream"),
            )
            .mount(&server)
            .await;

        let err = fetch_whole(fx.ctx(), &download, &url, &download.temp_file())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::ContentMismatch { .. }));
        assert!(!download.temp_file().exists());
    }

    #[tokio::test]
    async fn test_fetch_whole_records_size_and_progress() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let fx = Fixture::new().await;
        let url = format!("{}/f", server.uri());
        let download = fx.download(&url, None).await;
        let body = vec![9u8; 5000];

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let written = fetch_whole(fx.ctx(), &download, &url, &download.temp_file())
            .await
            .unwrap();

        assert_eq!(written, 5000);
        let row = fx.store.require(download.id).await.unwrap();
        assert_eq!(row.known_size(), Some(5000));
        assert_eq!(row.downloaded_bytes(), 5000);
        assert_eq!(std::fs::read(download.temp_file()).unwrap(), body);
    }

    // ==================== Checkpoint Tests ====================

    #[test]
    fn test_busy_database_defers_checkpoint() {
        let busy = StoreError::Database {
            kind: StoreDbErrorKind::BusyOrLocked,
            message: "database is locked".to_string(),
        };
        assert!(!checkpoint_saved(Err(busy), 4096).unwrap());
        assert!(checkpoint_saved(Ok(()), 4096).unwrap());

        let missing = checkpoint_saved(Err(StoreError::ChunkNotFound(7)), 4096).unwrap_err();
        assert!(matches!(
            missing,
            DownloadError::Store(StoreError::ChunkNotFound(7))
        ));

        let full = StoreError::Database {
            kind: StoreDbErrorKind::Io,
            message: "disk I/O error".to_string(),
        };
        assert!(checkpoint_saved(Err(full), 4096).is_err());
    }
}
