//! Shared request-scoped types.

use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

/// Per-request ephemeral state, created on entry to a handler and dropped
/// once the response is flushed. Never persisted, never cloned across
/// requests — see spec §3 "RequestContext".
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub app: String,
    pub client_key: String,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(app: impl Into<String>, client_key: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            app: app.into(),
            client_key: client_key.into(),
            started_at: Instant::now(),
        }
    }
}

/// Request extension set by [`crate::ratelimit::enforce`] once it has
/// resolved the peer address into a rate-limiter key, so downstream
/// handlers can populate [`RequestContext::client_key`] without
/// re-deriving it from the connection info.
#[derive(Debug, Clone)]
pub struct ClientKey(pub String);

/// Normalizes a peer socket address into the client key used to select a
/// rate-limiter bucket: the host portion only, port stripped. Spec §4.4
/// requires `400` when the peer address cannot be split into host/port;
/// `SocketAddr` is already parsed by the time axum hands it to a handler,
/// so the only failure this models is an unspecified/unusable address.
pub fn client_key_from_addr(addr: SocketAddr) -> Option<String> {
    let ip = addr.ip();
    if ip.is_unspecified() {
        return None;
    }
    Some(ip.to_string())
}
