//! Minimal HTTP/1.1 range server that can hold a body mid-stream.
//!
//! wiremock can only delay a whole response, so this server writes the
//! status line, headers and part of the body itself and then waits. HEAD
//! advertises `Accept-Ranges: bytes` with the full length; ranged GETs get a
//! 206. Every connection is closed after one response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use super::socket_guard::should_skip_socket_bound_test;

/// Longest a held body waits for [`StallControl::release`].
const HOLD_LIMIT: Duration = Duration::from_secs(30);

/// Shared observations and the release switch of a [`start`]ed server.
#[derive(Debug, Clone)]
pub struct StallControl {
    ranges: Arc<Mutex<Vec<String>>>,
    held: Arc<AtomicBool>,
    release: Arc<Notify>,
}

impl StallControl {
    /// `Range` headers of every GET so far.
    pub fn ranges(&self) -> Vec<String> {
        self.ranges.lock().unwrap().clone()
    }

    /// Forgets the recorded requests.
    pub fn clear(&self) {
        self.ranges.lock().unwrap().clear();
    }

    /// True once the held prefix has been written to the socket.
    pub fn is_holding(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Lets the held response send the rest of its body.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Where the first matching response stops.
#[derive(Debug, Clone, Copy)]
pub struct Hold {
    /// Range start the held request must have.
    pub start: u64,
    /// Body bytes written before holding.
    pub after: usize,
}

struct Shared {
    body: Vec<u8>,
    hold: Mutex<Option<Hold>>,
    control: StallControl,
}

/// Serves `body` at every path; the first GET whose range starts at
/// `hold.start` pauses after `hold.after` bytes.
///
/// Returns the base URL, or `None` when localhost sockets are unavailable.
pub async fn start(body: Vec<u8>, hold: Hold) -> Option<(String, StallControl)> {
    if should_skip_socket_bound_test() {
        return None;
    }
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let control = StallControl {
        ranges: Arc::new(Mutex::new(Vec::new())),
        held: Arc::new(AtomicBool::new(false)),
        release: Arc::new(Notify::new()),
    };
    let shared = Arc::new(Shared {
        body,
        hold: Mutex::new(Some(hold)),
        control: control.clone(),
    });

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let _ = handle(stream, &shared).await;
            });
        }
    });
    Some((base, control))
}

async fn handle(mut stream: TcpStream, shared: &Shared) -> std::io::Result<()> {
    let Some(request) = read_head(&mut stream).await? else {
        return Ok(());
    };
    let (method, range) = parse_request(&request);
    let total = shared.body.len() as u64;

    if method.eq_ignore_ascii_case("HEAD") {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n"
        );
        return stream.write_all(head.as_bytes()).await;
    }

    let (start, end) = match range {
        Some((start, end)) => {
            shared
                .control
                .ranges
                .lock()
                .unwrap()
                .push(format!("bytes={start}-{end}"));
            (start, end.min(total - 1))
        }
        None => (0, total - 1),
    };
    let slice = &shared.body[start as usize..=end as usize];
    let status = if range.is_some() { "206 Partial Content" } else { "200 OK" };
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Range: bytes {start}-{end}/{total}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
        slice.len()
    );
    stream.write_all(head.as_bytes()).await?;

    let hold = {
        let mut hold = shared.hold.lock().unwrap();
        match *hold {
            Some(h) if range.is_some() && h.start == start => hold.take(),
            _ => None,
        }
    };
    let Some(hold) = hold else {
        return stream.write_all(slice).await;
    };

    let split = hold.after.min(slice.len());
    stream.write_all(&slice[..split]).await?;
    stream.flush().await?;
    shared.control.held.store(true, Ordering::SeqCst);

    let _ = tokio::time::timeout(HOLD_LIMIT, shared.control.release.notified()).await;
    stream.write_all(&slice[split..]).await
}

/// Reads up to the blank line ending the request head.
async fn read_head(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        head.extend_from_slice(&buf[..n]);
    }
    Ok(Some(String::from_utf8_lossy(&head).into_owned()))
}

/// Returns the method and an inclusive `bytes=X-Y` range, if present.
fn parse_request(request: &str) -> (String, Option<(u64, u64)>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or_default()
        .to_string();

    let range = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .and_then(|(_, value)| {
            let (start, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
            let start = start.parse().ok()?;
            let end = if end.is_empty() { u64::MAX } else { end.parse().ok()? };
            Some((start, end))
        });
    (method, range)
}
