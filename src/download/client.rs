//! HTTP client wrapper for probing and ranged transfers.
//!
//! This module provides the `HttpClient` struct which owns the connection
//! pool, applies connect/read timeouts, and turns transport failures and
//! non-success statuses into tagged [`DownloadError`]s.

use std::time::Duration;

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, instrument};

use super::cancel::CancelScope;
use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// Range header used by the GET fallback probe.
const PROBE_RANGE: &str = "bytes=0-0";

/// What a probe learned about a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeResult {
    /// Total size in bytes, when the server reported one.
    pub size: Option<u64>,
    /// Whether the server honours `Range: bytes=` requests.
    pub accepts_ranges: bool,
}

/// A parsed `Content-Range: bytes <start>-<end>/<total>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte in the body (inclusive).
    pub start: u64,
    /// Last byte in the body (inclusive).
    pub end: u64,
    /// Full resource size, `None` for `*`.
    pub total: Option<u64>,
}

/// HTTP client for probing resources and fetching byte ranges.
///
/// Created once and shared by every orchestrator so connections are pooled.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with explicit timeouts and User-Agent.
    ///
    /// The read timeout bounds each individual body read, not the whole
    /// transfer; the overall per-download limit lives in the cancel scope.
    /// Compression is left off so Content-Length and byte offsets refer to the
    /// bytes written to disk.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the TLS backend cannot initialise.
    pub fn new(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
        user_agent: &str,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .user_agent(user_agent)
            .build()
            .map_err(|source| DownloadError::Client { source })?;
        Ok(Self { client })
    }

    /// Creates a client with the default timeouts (30s connect, 5min read).
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the TLS backend cannot initialise.
    pub fn with_defaults() -> Result<Self, DownloadError> {
        Self::new(
            CONNECT_TIMEOUT_SECS,
            READ_TIMEOUT_SECS,
            &user_agent::default_user_agent(),
        )
    }

    /// Sends a request, optionally ranged, and checks the status.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Network`] for transport failures
    /// - [`DownloadError::HttpStatus`] for non-2xx answers
    /// - [`DownloadError::Cancelled`] if `scope` fires first
    #[instrument(level = "debug", skip(self, scope), fields(method = %method))]
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        range: Option<&str>,
        scope: &CancelScope,
    ) -> Result<Response, DownloadError> {
        let mut request = self.client.request(method, url);
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }

        let response = scope
            .run(request.send())
            .await?
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }
        Ok(response)
    }

    /// Learns the size of `url` and whether it supports byte ranges.
    ///
    /// Sends HEAD first. Unless HEAD confirms both `Accept-Ranges: bytes` and
    /// a Content-Length, falls back to `GET Range: bytes=0-0`: a 206 reply
    /// proves range support and carries the total in `Content-Range`, a 200
    /// reply means ranges are ignored. If the fallback fails after HEAD
    /// succeeded, the HEAD answer is used.
    ///
    /// # Errors
    ///
    /// Returns the fallback's error when neither request succeeded, or
    /// [`DownloadError::Cancelled`].
    #[instrument(level = "debug", skip(self, scope))]
    pub async fn probe(&self, url: &str, scope: &CancelScope) -> Result<ProbeResult, DownloadError> {
        let head = match self.send(Method::HEAD, url, None, scope).await {
            Ok(response) => Some(ProbeResult {
                size: header_content_length(&response),
                accepts_ranges: advertises_byte_ranges(&response),
            }),
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                debug!(error = %error, "HEAD probe failed, falling back to ranged GET");
                None
            }
        };

        if let Some(info) = head
            && info.accepts_ranges
            && info.size.is_some()
        {
            return Ok(info);
        }

        let response = match self
            .send(Method::GET, url, Some(PROBE_RANGE), scope)
            .await
        {
            Ok(response) => response,
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                return match head {
                    Some(info) => {
                        debug!(error = %error, "ranged GET probe failed, using HEAD answer");
                        Ok(info)
                    }
                    None => Err(error),
                };
            }
        };

        let head_size = head.and_then(|info| info.size);
        let result = if response.status() == StatusCode::PARTIAL_CONTENT {
            let total = content_range(&response).and_then(|range| range.total);
            ProbeResult {
                size: total.or(head_size),
                accepts_ranges: total.is_some(),
            }
        } else {
            ProbeResult {
                size: header_content_length(&response).or(head_size),
                accepts_ranges: false,
            }
        };
        debug!(size = ?result.size, accepts_ranges = result.accepts_ranges, "probe complete");
        Ok(result)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Parses a `Content-Range` value such as `bytes 0-0/12582912`.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.trim().split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some(ContentRange { start, end, total })
}

/// Returns the parsed `Content-Range` header of `response`.
#[must_use]
pub fn content_range(response: &Response) -> Option<ContentRange> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range)
}

/// Returns the media type of `response`, lowercased and without parameters.
#[must_use]
pub fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
}

/// Reads Content-Length straight from the headers.
///
/// `Response::content_length` reflects the body size hint, which is zero for
/// HEAD replies, so the header is parsed directly.
#[must_use]
pub fn header_content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn advertises_byte_ranges(response: &Response) -> bool {
    response
        .headers()
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"))
}
