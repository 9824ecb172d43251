//! Range-capable mock file server built on a custom wiremock responder.
//!
//! HEAD is answered with 405 so the probe falls back to `GET bytes=0-0`.
//! Ranged GETs get a 206 with `Content-Range`; unranged GETs get the whole
//! body. Every GET's `Range` header is recorded in arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiremock::matchers::path;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use super::socket_guard::start_mock_server_or_skip;

/// How long a stalled range request is held before answering.
pub const STALL_DELAY: Duration = Duration::from_secs(5);

/// Shared knobs and observations for a [`RangeResponder`].
#[derive(Debug, Clone)]
pub struct RangeControl {
    ranges: Arc<Mutex<Vec<Option<String>>>>,
    stall_from: Arc<AtomicU64>,
    short_once: Arc<Mutex<Option<(u64, usize)>>>,
}

impl RangeControl {
    fn new() -> Self {
        Self {
            ranges: Arc::new(Mutex::new(Vec::new())),
            stall_from: Arc::new(AtomicU64::new(u64::MAX)),
            short_once: Arc::new(Mutex::new(None)),
        }
    }

    /// `Range` headers of every GET so far, `None` for unranged requests.
    pub fn ranges(&self) -> Vec<Option<String>> {
        self.ranges.lock().unwrap().clone()
    }

    /// Ranged GETs so far, excluding the `bytes=0-0` probe.
    pub fn chunk_ranges(&self) -> Vec<String> {
        self.ranges()
            .into_iter()
            .flatten()
            .filter(|r| r != "bytes=0-0")
            .collect()
    }

    /// Forgets the recorded requests.
    pub fn clear(&self) {
        self.ranges.lock().unwrap().clear();
    }

    /// Holds every range request starting at or after `offset` for
    /// [`STALL_DELAY`].
    pub fn stall_from(&self, offset: u64) {
        self.stall_from.store(offset, Ordering::SeqCst);
    }

    /// Stops stalling.
    pub fn release(&self) {
        self.stall_from.store(u64::MAX, Ordering::SeqCst);
    }

    /// The next range request starting exactly at `start` gets only
    /// `bytes` bytes of its body.
    pub fn cut_short_once(&self, start: u64, bytes: usize) {
        *self.short_once.lock().unwrap() = Some((start, bytes));
    }
}

/// Serves `body` honouring byte ranges.
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    control: RangeControl,
}

fn parse_range(header: &str, total: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() {
        total - 1
    } else {
        end.parse::<u64>().ok()?.min(total - 1)
    };
    (start <= end).then_some((start, end))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if request.method.as_str() == "HEAD" {
            return ResponseTemplate::new(405);
        }

        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.control.ranges.lock().unwrap().push(range.clone());

        let total = self.body.len() as u64;
        let Some(range) = range else {
            return ResponseTemplate::new(200).set_body_bytes(self.body.as_slice().to_vec());
        };
        let Some((start, end)) = parse_range(&range, total) else {
            return ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{total}").as_str());
        };

        let mut slice = self.body[start as usize..=end as usize].to_vec();
        {
            let mut short = self.control.short_once.lock().unwrap();
            if let Some((short_start, bytes)) = *short
                && short_start == start
            {
                slice.truncate(bytes);
                *short = None;
            }
        }

        let template = ResponseTemplate::new(206)
            .insert_header("Content-Range", format!("bytes {start}-{end}/{total}").as_str())
            .insert_header("Accept-Ranges", "bytes")
            .set_body_bytes(slice);
        if start >= self.control.stall_from.load(Ordering::SeqCst) {
            template.set_delay(STALL_DELAY)
        } else {
            template
        }
    }
}

/// Starts a server exposing `body` at `route`.
///
/// Returns `None` when localhost sockets are unavailable.
pub async fn range_server(route: &str, body: Vec<u8>) -> Option<(MockServer, RangeControl)> {
    let server = start_mock_server_or_skip().await?;
    let control = mount_range_file(&server, route, body).await;
    Some((server, control))
}

/// Mounts another range-capable file on an existing server.
pub async fn mount_range_file(server: &MockServer, route: &str, body: Vec<u8>) -> RangeControl {
    let control = RangeControl::new();
    Mock::given(path(route))
        .respond_with(RangeResponder {
            body: Arc::new(body),
            control: control.clone(),
        })
        .mount(server)
        .await;
    control
}

/// Deterministic, non-repeating-looking test payload.
pub fn patterned_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}
