//! chunkdl core library
//!
//! Resumable, chunked HTTP downloads with durable progress. A download
//! survives pauses, timeouts and process crashes: its byte ranges and their
//! progress live in `SQLite`, and the next run continues from the last
//! checkpoint.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`store`] - Download and chunk persistence, status state machine
//! - [`download`] - Planner, fetcher, retry, orchestrator, scheduler, verifier
//! - [`config`] - Engine configuration and the TOML file loader
//! - [`user_agent`] - Default User-Agent header

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod download;
pub mod store;
pub mod user_agent;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use db::{Database, DbError};
pub use download::{
    BatchReport, DownloadEngine, DownloadError, DownloadOutcome, EngineError, FailureKind,
    HttpClient, Orchestrator, OrchestratorSettings, RetryConfig, SchedulerEvent, VerifyOutcome,
};
pub use store::{Download, DownloadStatus, NewDownload, Store, StoreError};
