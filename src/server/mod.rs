//! Router assembly and server lifecycle (spec §4.6, §5).
//!
//! Grounded on the teacher's `proxy/server.rs`: a `ProxyServer` owning
//! shared state and a `ServiceBuilder` middleware stack, trimmed to the two
//! concerns spec §4.6 actually names — a per-request deadline and the
//! rate-limit middleware, outermost first — and generalized from the
//! teacher's `tokio::sync::broadcast` shutdown signal to a
//! `tokio_util::sync::CancellationToken` (already a teacher dependency via
//! `tokio-util`), which is what lets the same token both stop the listener
//! and cancel the `ConfigWatcher` and rate-limiter sweeper.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::{Config, ConfigStore, ConfigWatcher};
use crate::error::ConfigError;
use crate::ingest;
use crate::metrics;
use crate::ratelimit::{self, RateLimiter};

/// The daemon's collaborator surface (spec §6 "CLI / environment"),
/// resolved once at startup. The core treats these as opaque inputs; only
/// `base_dir` has a documented precedence rule (spec §9 open question,
/// decided in DESIGN.md): the CLI/env value wins over the config file's
/// `base_dir` field when both are present.
#[derive(Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub base_dir_override: Option<PathBuf>,
    pub listen_host: String,
    pub listen_port: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub request_timeout: Duration,
    pub max_header_bytes: usize,
    pub max_upload_bytes: usize,
    pub rate_limit_ps: f64,
    pub burst_limit: u32,
    pub config_debounce: Duration,
    pub shutdown_grace: Duration,
}

/// Settings resolved against the loaded `Config`, handed to every handler
/// via `AppState`. Distinct from `Settings` so the CLI-vs-config-file
/// precedence decision happens exactly once, at startup.
pub struct ResolvedSettings {
    pub base_dir: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub config_store: Arc<ConfigStore>,
    pub settings: Arc<ResolvedSettings>,
}

/// Resolves `BaseDir` precedence (spec §9 open question): the CLI flag/env
/// var wins when present; otherwise the config file's `base_dir` field;
/// fatal if neither is set, since the pipeline has nowhere to write.
fn resolve_base_dir(settings: &Settings, config: &Config) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = &settings.base_dir_override {
        tracing::info!(source = "cli", base_dir = %dir.display(), "resolved base directory");
        return Ok(dir.clone());
    }
    if let Some(dir) = &config.base_dir {
        tracing::info!(source = "config file", base_dir = %dir.display(), "resolved base directory");
        return Ok(dir.clone());
    }
    Err(ConfigError::Startup(
        "no base_dir: set --base-dir/INSIGHTS_INGEST_BASE_DIR or the config file's base_dir field"
            .to_string(),
    ))
}

fn build_router(config_store: Arc<ConfigStore>, settings: Arc<ResolvedSettings>, limiter: Arc<RateLimiter>, request_timeout: Duration) -> Router {
    let max_upload_bytes = settings.max_upload_bytes;
    let app_state = AppState {
        config_store,
        settings,
    };

    // The modern endpoint's `Bytes` extractor is subject to axum's built-in
    // `DefaultBodyLimit`, which defaults to 2 MiB regardless of
    // `MaxUploadBytes` — raised here to track the configured ceiling so
    // `reject_oversize` (spec §4.5 step 5, `413`) is what actually decides
    // oversize bodies up to that ceiling. The legacy endpoint's own
    // streaming multipart read enforces the same ceiling itself and
    // surfaces `400` rather than `413` on oversize (spec §4.5 step 5's
    // deliberate surface difference), so the default limit is disabled
    // there instead of re-applied — otherwise axum would short-circuit with
    // `413` before that handler's `400` path ever ran.
    let modern = Router::new()
        .route("/upload/:app", post(ingest::upload_modern))
        .layer(axum::extract::DefaultBodyLimit::max(max_upload_bytes));

    let legacy = Router::new()
        .route("/:distribution/desktop/:version", post(ingest::upload_legacy))
        .layer(axum::extract::DefaultBodyLimit::disable());

    let protected = modern.merge(legacy).layer(
        ServiceBuilder::new()
            .layer(tower::timeout::TimeoutLayer::new(request_timeout))
            .layer(middleware::from_fn_with_state(limiter, ratelimit::enforce)),
    );

    let unbounded = Router::new()
        .route("/version", get(ingest::version))
        .route("/metrics", get(metrics::metrics_handler));

    protected
        .merge(unbounded)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Owns the listener, the config watcher task, and the rate-limiter
/// sweeper task for the process's lifetime. `run` returns once the listener
/// has stopped accepting connections and in-flight work has drained or the
/// grace deadline has elapsed (spec §4.6 "Server Lifecycle").
pub struct Server {
    router: Router,
    listener: TcpListener,
    watcher: ConfigWatcher,
    limiter: Arc<RateLimiter>,
    shutdown_grace: Duration,
}

impl Server {
    /// Loads `Config` synchronously (fatal on failure, per spec §4.6),
    /// starts the `ConfigWatcher`, binds the listener, and assembles the
    /// router. Nothing is served yet — call `run`.
    pub async fn build(settings: Settings) -> Result<Self, ConfigError> {
        let initial_config = Config::from_file(&settings.config_path)?;
        let resolved = Arc::new(ResolvedSettings {
            base_dir: resolve_base_dir(&settings, &initial_config)?,
            max_upload_bytes: settings.max_upload_bytes,
        });

        crate::persist::ensure_dir(&resolved.base_dir).map_err(|e| {
            ConfigError::Read(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;

        let config_store = Arc::new(ConfigStore::new(initial_config));
        let (watcher, mut events, mut errors) = ConfigWatcher::start(
            &settings.config_path,
            config_store.clone(),
            settings.config_debounce,
        )?;

        // Non-blocking observers per spec §4.3: the request path never reads
        // these, but reload outcomes still feed the ambient metrics/logging.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = events.recv() => {
                        metrics::record_config_reload(true);
                        tracing::debug!(allow_list_len = event.allow_list_len, "config reload event observed");
                    }
                    Some(failure) = errors.recv() => {
                        metrics::record_config_reload(false);
                        tracing::debug!(message = %failure.message, "config reload failure observed");
                    }
                    else => break,
                }
            }
        });

        let limiter = Arc::new(RateLimiter::new(settings.rate_limit_ps, settings.burst_limit));

        let addr: SocketAddr = format!("{}:{}", settings.listen_host, settings.listen_port)
            .parse()
            .map_err(|e| {
                ConfigError::Read(std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid listen address: {e}")))
            })?;
        let listener = TcpListener::bind(addr).await.map_err(ConfigError::Read)?;
        tracing::info!(%addr, "listening");

        let router = build_router(config_store, resolved, limiter.clone(), settings.request_timeout);

        Ok(Self {
            router,
            listener,
            watcher,
            limiter,
            shutdown_grace: settings.shutdown_grace,
        })
    }

    /// Serves requests until `shutdown` is cancelled, then drains for up to
    /// `shutdown_grace` before returning. Cancels the config watcher and
    /// rate-limiter sweeper as part of the same shutdown (spec §4.6: "the
    /// ConfigWatcher is canceled as part of shutdown").
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let sweeper_cancel = shutdown.clone();
        let sweeper_limiter = self.limiter.clone();
        let sweeper = tokio::spawn(async move {
            sweeper_limiter.run_sweeper(sweeper_cancel).await;
        });

        let serve_shutdown = shutdown.clone();
        let result = axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            serve_shutdown.cancelled().await;
            tracing::info!("shutdown signal received, draining in-flight requests");
        })
        .await;

        tokio::time::timeout(self.shutdown_grace, sweeper).await.ok();
        self.watcher.stop();

        result
    }
}
