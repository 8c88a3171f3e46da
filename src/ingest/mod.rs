//! The upload endpoint state machine (spec §4.5): method check → path
//! validation → allow-list check → size-bounded body read → JSON validity
//! check → directory creation → atomic write → response.
//!
//! Grounded on the teacher's `handler.rs` step-by-step `Result`-chaining
//! style (each stage returns early via `?`, converted to a response by
//! `IntoResponse`), generalized from JSON-RPC dispatch to this crate's
//! single linear pipeline. The legacy endpoint (§6 "Wire — upload
//! (legacy)") shares every step except body shape and the oversize-body
//! status code.

use std::path::PathBuf;

use axum::body::Bytes;
use axum::extract::{Extension, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::instrument;

use crate::error::IngestError;
use crate::server::AppState;
use crate::types::{ClientKey, RequestContext};

mod path_segment;
pub use path_segment::validate_segment;

/// `POST /upload/{app}` — spec §6 "Wire — upload (modern)". Body is the raw
/// JSON report; oversize bodies are rejected `413` (spec §4.5 step 5).
#[instrument(skip(state, body), fields(app = %app, request_id = tracing::field::Empty))]
pub async fn upload_modern(
    State(state): State<AppState>,
    Path(app): Path<String>,
    Extension(ClientKey(client_key)): Extension<ClientKey>,
    body: Bytes,
) -> Result<Response, IngestError> {
    let ctx = RequestContext::new(app.clone(), client_key);
    tracing::Span::current().record("request_id", tracing::field::display(ctx.request_id));
    tracing::info!(request_id = %ctx.request_id, "upload received");

    validate_segment(&app).map_err(|e| reject(&ctx, e))?;
    check_allowed(&state, &app).map_err(|e| reject(&ctx, e))?;
    reject_oversize(&body, state.settings.max_upload_bytes, IngestError::BodyTooLarge)
        .map_err(|e| reject(&ctx, e))?;
    validate_json(&body).map_err(|e| reject(&ctx, e))?;
    persist(&state, &app, &ctx, &body).map_err(|e| reject(&ctx, e))?;

    crate::metrics::record_request("upload", StatusCode::CREATED.as_u16());
    Ok(respond_created(&ctx))
}

/// `POST /{distribution}/desktop/{version}` — spec §6 "Wire — upload
/// (legacy)". Body is `multipart/form-data` with a `file` field; the app key
/// is `ubuntu-report/{distribution}/desktop/{version}` and oversize bodies
/// are rejected `400` instead of `413` — the deliberate surface difference
/// spec §4.5 step 5 calls out.
#[instrument(skip(state, multipart), fields(distribution = %distribution, version = %version, request_id = tracing::field::Empty))]
pub async fn upload_legacy(
    State(state): State<AppState>,
    Path((distribution, version)): Path<(String, String)>,
    Extension(ClientKey(client_key)): Extension<ClientKey>,
    mut multipart: Multipart,
) -> Result<Response, IngestError> {
    // The RequestContext is created before the app key is known (it isn't
    // computable until the distribution/version segments have been
    // validated), so every rejection below — including path validation
    // failures — still logs against a request ID, per spec §4.5 "request ID
    // appears in every log line for that request".
    let mut ctx = RequestContext::new(String::new(), client_key);
    tracing::Span::current().record("request_id", tracing::field::display(ctx.request_id));
    tracing::info!(request_id = %ctx.request_id, "legacy upload received");

    validate_segment(&distribution).map_err(|e| reject(&ctx, e))?;
    validate_segment(&version).map_err(|e| reject(&ctx, e))?;
    let app = format!("ubuntu-report/{distribution}/desktop/{version}");
    ctx.app = app.clone();

    check_allowed(&state, &app).map_err(|e| reject(&ctx, e))?;

    let body = read_multipart_file_field(&mut multipart, state.settings.max_upload_bytes)
        .await
        .map_err(|e| reject(&ctx, e))?;
    validate_json(&body).map_err(|e| reject(&ctx, e))?;
    persist(&state, &app, &ctx, &body).map_err(|e| reject(&ctx, e))?;

    crate::metrics::record_request("legacy", StatusCode::OK.as_u16());
    Ok((StatusCode::OK, [("X-Request-Id", ctx.request_id.to_string())]).into_response())
}

/// Logs a rejected request with its request ID, app, and error detail
/// before the error is converted to a response (spec §7: "All errors are
/// logged with request ID, app, and error detail"). `IngestError`'s
/// `IntoResponse` impl deliberately does not log — by the time axum calls
/// it, this function's `#[instrument]` span has already closed.
fn reject(ctx: &RequestContext, err: IngestError) -> IngestError {
    tracing::error!(
        request_id = %ctx.request_id,
        app = %ctx.app,
        status = %err.status_code().as_u16(),
        error = %err,
        "request rejected"
    );
    err
}

/// `GET /version` — spec §6 "Wire — version". Unbounded: no rate limit, no
/// allow-list check, static body.
pub async fn version() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "application/json")],
        serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }).to_string(),
    )
}

fn check_allowed(state: &AppState, app: &str) -> Result<(), IngestError> {
    if state.config_store.current().is_allowed(app) {
        Ok(())
    } else {
        Err(IngestError::AppNotAllowed)
    }
}

fn reject_oversize(body: &[u8], max: usize, err: IngestError) -> Result<(), IngestError> {
    if body.len() > max {
        Err(err)
    } else {
        Ok(())
    }
}

fn validate_json(body: &[u8]) -> Result<(), IngestError> {
    serde_json::from_slice::<serde_json::Value>(body)
        .map(|_| ())
        .map_err(|_| IngestError::JsonInvalid)
}

/// Spec §4.5 step 7: `mkdir -p BaseDir/app`, compute `BaseDir/app/<req-id>.json`,
/// then the atomic write. Ordering guarantee (spec §4.5): the success
/// response is only built after this returns `Ok`, so any observed success
/// implies the bytes are already on disk at the canonical path.
fn persist(
    state: &AppState,
    app: &str,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<(), IngestError> {
    let started = std::time::Instant::now();
    let app_dir: PathBuf = state.settings.base_dir.join(app);
    crate::persist::ensure_dir(&app_dir)?;

    let target = app_dir.join(format!("{}.json", ctx.request_id));
    crate::persist::atomic_write(&target, body)?;

    crate::metrics::record_persist_duration(app, started.elapsed());
    tracing::info!(path = %target.display(), bytes = body.len(), "report persisted");
    Ok(())
}

fn respond_created(ctx: &RequestContext) -> Response {
    (
        StatusCode::CREATED,
        [("X-Request-Id", ctx.request_id.to_string())],
    )
        .into_response()
}

/// Reads the `file` field of a multipart body up to `max` bytes, erroring
/// (without relying on axum's global body-limit layer) so the legacy
/// endpoint can surface `400` instead of `413` on oversize bodies.
async fn read_multipart_file_field(
    multipart: &mut Multipart,
    max: usize,
) -> Result<Vec<u8>, IngestError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| IngestError::BodyReadError(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let mut buf = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| IngestError::BodyReadError(e.to_string()))?
        {
            buf.extend_from_slice(&chunk);
            if buf.len() > max {
                // Legacy endpoint surfaces oversize bodies as 400, not 413
                // (spec §4.5 step 5).
                return Err(IngestError::BodyReadError("body too large".to_string()));
            }
        }
        return Ok(buf);
    }

    Err(IngestError::BodyReadError("missing `file` field".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversize_body() {
        let body = vec![0u8; 10];
        assert!(reject_oversize(&body, 5, IngestError::BodyTooLarge).is_err());
        assert!(reject_oversize(&body, 10, IngestError::BodyTooLarge).is_ok());
    }

    #[test]
    fn validates_json_syntax_only() {
        assert!(validate_json(b"{\"a\":1}").is_ok());
        assert!(validate_json(b"[1,2,3]").is_ok());
        assert!(validate_json(b"\"a bare string\"").is_ok());
        assert!(validate_json(b"{").is_err());
    }
}
