//! Error types for insights-ingestd.
//!
//! Two families, mirroring the scope split in spec §7: [`ConfigError`] covers
//! config load/parse/watch failures, which never reach an HTTP client
//! directly, and [`IngestError`] covers per-request failures, which convert
//! straight into the status-code table spec §7 pins. Error bodies returned to
//! clients are plain text and never include filesystem paths or anything
//! beyond the request ID, which travels in a header instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

/// Failures that occur loading or watching the configuration file, or
/// elsewhere during startup before the listener is serving traffic.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to start config watcher: {0}")]
    WatcherSetup(#[from] notify::Error),

    /// Any other fatal startup failure (listener bind, invalid listen
    /// address, unresolved `base_dir`) that isn't specifically a config
    /// file read/parse/watch failure.
    #[error("startup failed: {0}")]
    Startup(String),
}

/// Failures surfaced while serving a single upload request.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("unsupported method")]
    MethodNotAllowed,

    #[error("invalid path segment")]
    PathInvalid,

    #[error("application not recognized")]
    AppNotAllowed,

    #[error("request body too large")]
    BodyTooLarge,

    #[error("failed to read request body: {0}")]
    BodyReadError(String),

    #[error("request body is not valid JSON")]
    JsonInvalid,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("unable to determine client address")]
    UnresolvableClient,

    #[error("failed to persist report: {0}")]
    Persistence(#[from] crate::persist::WriteError),
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            IngestError::PathInvalid | IngestError::AppNotAllowed => StatusCode::FORBIDDEN,
            IngestError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::BodyReadError(_) | IngestError::JsonInvalid => StatusCode::BAD_REQUEST,
            IngestError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            IngestError::UnresolvableClient => StatusCode::BAD_REQUEST,
            IngestError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Generic client-facing message. AppNotAllowed and PathInvalid are
    /// deliberately identical per spec §7, to avoid letting a client probe
    /// the allow-list by distinguishing the two.
    pub fn client_message(&self) -> &'static str {
        match self {
            IngestError::MethodNotAllowed => "method not allowed",
            IngestError::PathInvalid | IngestError::AppNotAllowed => "forbidden",
            IngestError::BodyTooLarge => "request body too large",
            IngestError::BodyReadError(_) => "failed to read request body",
            IngestError::JsonInvalid => "request body is not valid JSON",
            IngestError::RateLimited => "rate limit exceeded",
            IngestError::UnresolvableClient => "unable to determine client address",
            IngestError::Persistence(_) => "internal error",
        }
    }
}

impl IntoResponse for IngestError {
    /// Builds the client-facing response only. Logging happens at the
    /// point the error is raised — inline in the upload handlers (where a
    /// `RequestContext` carries the request ID and app per spec §7) or in
    /// the rate-limit middleware for the two errors that predate a
    /// `RequestContext` (spec §3: the request ID's lifetime "begins on
    /// entry to the handler"). Logging here instead would run after the
    /// originating `#[instrument]` span has already closed and without
    /// that context.
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.client_message();
        crate::metrics::record_request("rejected", status.as_u16());
        (status, message).into_response()
    }
}
