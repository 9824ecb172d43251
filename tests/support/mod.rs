//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod range_server;
pub mod socket_guard;
pub mod stall_server;

use chunkdl::download::{OrchestratorSettings, RetryConfig};
use chunkdl::{Database, DownloadEngine, HttpClient, Store};
use std::time::Duration;

/// Settings with fast retries so failure paths finish quickly.
pub fn fast_settings(chunk_size: u64, max_attempts: u32) -> OrchestratorSettings {
    OrchestratorSettings {
        chunk_size,
        checkpoint_interval: 64 * 1024,
        retry: RetryConfig::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
        ),
        download_timeout: Duration::from_secs(60),
        heartbeat_interval: Duration::from_millis(50),
    }
}

/// Engine over an in-memory database.
pub async fn memory_engine(settings: OrchestratorSettings, max_concurrent: usize) -> DownloadEngine {
    let store = Store::new(Database::new_in_memory().await.unwrap());
    engine_over(store, settings, max_concurrent)
}

/// Engine over an existing store.
pub fn engine_over(
    store: Store,
    settings: OrchestratorSettings,
    max_concurrent: usize,
) -> DownloadEngine {
    DownloadEngine::new(
        store,
        HttpClient::with_defaults().unwrap(),
        settings,
        max_concurrent,
    )
    .unwrap()
}

/// Lowercase MD5 hex digest of `bytes`.
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}
