//! Signal handling for graceful shutdown.
//!
//! Adapted from the teacher's `daemon/signals.rs`, which fires a
//! `tokio::sync::broadcast` sender on `SIGTERM`/`SIGINT`. This crate's
//! lifecycle (`crate::server::Server::run`) drains on a
//! `tokio_util::sync::CancellationToken` instead (spec §4.6/§5: the
//! ConfigWatcher and rate-limiter sweeper must also observe the same
//! cancellation), so this module cancels that token directly rather than
//! broadcasting.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Spawns a task that cancels `token` on `SIGTERM` or `SIGINT` (Ctrl+C on
/// Windows). Returns immediately; the caller awaits `token.cancelled()`
/// wherever shutdown should take effect.
#[cfg(unix)]
pub fn install(token: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("received SIGINT, initiating graceful shutdown"),
        }

        token.cancel();
    });
}

#[cfg(windows)]
pub fn install(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, initiating graceful shutdown");
            token.cancel();
        }
    });
}
