//! Shared test harness for the ingestion service integration tests.
//!
//! Grounded on the teacher's `tests/common/mod.rs` (`test_config` +
//! `start_test_server` building a real `TcpListener` on an ephemeral port),
//! adapted to this crate's `Config`/`Settings` split: a `tempfile::TempDir`
//! backs both the watched config file and `BaseDir` so every test gets an
//! isolated filesystem tree.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use insights_ingestd::server::{Server, Settings};
use reqwest::Client;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct TestHarness {
    pub base_url: String,
    pub config_path: PathBuf,
    pub base_dir: PathBuf,
    _config_dir: TempDir,
    _base_dir: TempDir,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl TestHarness {
    /// Starts a server with the given allow-list, rate `rate` tokens/sec and
    /// `burst` burst size, on an ephemeral port. Also caps `MaxUploadBytes`
    /// at 1024 so the oversize-body boundary case (spec §8 S6) is exercisable
    /// without building megabyte-sized test fixtures.
    pub async fn start(allow_list: &[&str], rate: f64, burst: u32) -> Self {
        Self::start_with_max_upload_bytes(allow_list, rate, burst, 1024).await
    }

    /// Same as [`Self::start`] but with an explicit `MaxUploadBytes`, for
    /// tests that need to exercise the configured limit rather than the
    /// small fixture-friendly default (e.g. proving that a body between
    /// axum's built-in 2 MiB `DefaultBodyLimit` and a larger configured
    /// ceiling is still accepted, not silently capped at 2 MiB).
    pub async fn start_with_max_upload_bytes(
        allow_list: &[&str],
        rate: f64,
        burst: u32,
        max_upload_bytes: usize,
    ) -> Self {
        let config_dir = TempDir::new().expect("config tempdir");
        let base_dir_holder = TempDir::new().expect("base dir tempdir");
        let config_path = config_dir.path().join("config.json");
        let base_dir = base_dir_holder.path().to_path_buf();

        write_config(&config_path, allow_list);

        // Port 0 asks the OS for an ephemeral port; `Server::build` only
        // accepts a fixed port, so a throwaway probe bind picks one first.
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let settings = Settings {
            config_path: config_path.clone(),
            base_dir_override: Some(base_dir.clone()),
            listen_host: "127.0.0.1".to_string(),
            listen_port: port,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            max_header_bytes: 16 * 1024,
            max_upload_bytes,
            rate_limit_ps: rate,
            burst_limit: burst,
            config_debounce: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(2),
        };

        let server = Server::build(settings).await.expect("server builds");
        let shutdown = CancellationToken::new();
        let run_token = shutdown.clone();
        let handle = tokio::spawn(async move {
            server.run(run_token).await.expect("server runs");
        });

        // Give the listener a moment to accept connections.
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            config_path,
            base_dir,
            _config_dir: config_dir,
            _base_dir: base_dir_holder,
            shutdown,
            handle,
        }
    }

    pub fn rewrite_config(&self, allow_list: &[&str]) {
        write_config(&self.config_path, allow_list);
    }

    pub fn files_under(&self, app: &str) -> Vec<PathBuf> {
        let dir = self.base_dir.join(app);
        match fs::read_dir(&dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}

fn write_config(path: &PathBuf, allow_list: &[&str]) {
    let body = json!({ "allowList": allow_list });
    fs::write(path, serde_json::to_vec(&body).unwrap()).unwrap();
}

pub fn client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build test client")
}

/// Polls until `condition` is true or `timeout` elapses.
pub async fn wait_for<F: FnMut() -> bool>(mut condition: F, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
