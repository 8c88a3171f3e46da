//! insights-ingestd library
//!
//! Core of the telemetry ingestion service: hot-reloading admission
//! configuration, per-client rate limiting, and the upload pipeline that
//! persists accepted reports atomically to disk. The binary in `main.rs` is
//! a thin CLI/process wrapper around this library.

pub mod config;
pub mod daemon;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod persist;
pub mod ratelimit;
pub mod server;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, IngestError};
pub use server::{ResolvedSettings, Server, Settings};
