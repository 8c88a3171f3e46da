//! insights-ingestd — telemetry ingestion daemon.
//!
//! CLI/process wrapper around the [`insights_ingestd`] library: parses
//! flags, initializes tracing, loads configuration, and drives the
//! [`Server`] through its run/shutdown lifecycle. The command wiring itself
//! (flag parsing, signal handler, process init) is explicitly out of core
//! scope per spec §1 — this file is the named external collaborator.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use insights_ingestd::server::{Server, Settings};
use insights_ingestd::{Config, ConfigError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "insights-ingestd")]
#[command(about = "Telemetry ingestion daemon: admission-controlled, hot-reloadable JSON report intake over HTTP")]
#[command(version)]
struct Cli {
    /// Path to the allow-list configuration file.
    #[arg(short, long, env = "INSIGHTS_INGEST_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "INSIGHTS_INGEST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ingestion server in the foreground.
    Start {
        /// Base directory reports are persisted under. Overrides the
        /// config file's `base_dir` field when present (spec §9 open
        /// question; see DESIGN.md).
        #[arg(long, env = "INSIGHTS_INGEST_BASE_DIR")]
        base_dir: Option<PathBuf>,

        /// Listen host.
        #[arg(long, env = "INSIGHTS_INGEST_HOST", default_value = "0.0.0.0")]
        host: String,

        /// Listen port.
        #[arg(long, env = "INSIGHTS_INGEST_PORT", default_value_t = 8080)]
        port: u16,

        /// Socket read timeout.
        #[arg(long, env = "INSIGHTS_INGEST_READ_TIMEOUT", value_parser = humantime::parse_duration, default_value = "30s")]
        read_timeout: Duration,

        /// Socket write timeout.
        #[arg(long, env = "INSIGHTS_INGEST_WRITE_TIMEOUT", value_parser = humantime::parse_duration, default_value = "30s")]
        write_timeout: Duration,

        /// Hard per-request deadline, applied outermost in the middleware
        /// stack (spec §4.6).
        #[arg(long, env = "INSIGHTS_INGEST_REQUEST_TIMEOUT", value_parser = humantime::parse_duration, default_value = "10s")]
        request_timeout: Duration,

        /// Maximum size of request headers.
        #[arg(long, env = "INSIGHTS_INGEST_MAX_HEADER_BYTES", default_value_t = 16 * 1024)]
        max_header_bytes: usize,

        /// Maximum accepted upload body size in bytes (spec §3 `Report`,
        /// §8 boundary case).
        #[arg(long, env = "INSIGHTS_INGEST_MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
        max_upload_bytes: usize,

        /// Token bucket refill rate, in tokens per second (spec §4.4).
        #[arg(long, env = "INSIGHTS_INGEST_RATE_LIMIT_PS", default_value_t = 1.0)]
        rate_limit_ps: f64,

        /// Token bucket burst size (spec §4.4).
        #[arg(long, env = "INSIGHTS_INGEST_BURST_LIMIT", default_value_t = 10)]
        burst_limit: u32,

        /// Debounce window the config watcher coalesces filesystem events
        /// over (spec §4.3, §9 "filesystem event coalescing").
        #[arg(long, env = "INSIGHTS_INGEST_CONFIG_DEBOUNCE", value_parser = humantime::parse_duration, default_value = "200ms")]
        config_debounce: Duration,

        /// Grace period given to in-flight requests on shutdown before the
        /// listener is force-closed (spec §4.6, §5).
        #[arg(long, env = "INSIGHTS_INGEST_SHUTDOWN_GRACE", value_parser = humantime::parse_duration, default_value = "15s")]
        shutdown_grace: Duration,
    },

    /// Parse and validate a configuration file without starting the server.
    Validate {
        /// Configuration file to validate.
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    info!("insights-ingestd v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Start {
            base_dir,
            host,
            port,
            read_timeout,
            write_timeout,
            request_timeout,
            max_header_bytes,
            max_upload_bytes,
            rate_limit_ps,
            burst_limit,
            config_debounce,
            shutdown_grace,
        } => {
            let settings = Settings {
                config_path: cli.config,
                base_dir_override: base_dir,
                listen_host: host,
                listen_port: port,
                read_timeout,
                write_timeout,
                request_timeout,
                max_header_bytes,
                max_upload_bytes,
                rate_limit_ps,
                burst_limit,
                config_debounce,
                shutdown_grace,
            };
            run(settings).await
        }
        Commands::Validate { config } => validate(&config),
    };

    if let Err(e) = result {
        error!(error = %e, "insights-ingestd exited with an error");
        std::process::exit(1);
    }
}

/// Loads config synchronously (fatal on failure per spec §4.6), binds the
/// listener, installs the OS signal handler, and runs until shutdown.
async fn run(settings: Settings) -> Result<(), ConfigError> {
    let server = Server::build(settings).await?;

    let shutdown = CancellationToken::new();
    insights_ingestd::daemon::signals::install(shutdown.clone());

    server
        .run(shutdown)
        .await
        .map_err(ConfigError::Read)?;

    info!("insights-ingestd stopped");
    Ok(())
}

fn validate(config_path: &PathBuf) -> Result<(), ConfigError> {
    match Config::from_file(config_path) {
        Ok(config) => {
            println!(
                "config valid: {} app(s) in allow-list",
                config.allow_list.len()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("config invalid: {e}");
            Err(e)
        }
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}
