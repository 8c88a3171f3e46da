//! Directory-level config file watcher with debounce and reload.
//!
//! Watches the **directory** containing the config file, not the file
//! itself, because editors commonly save via rename-in-place or
//! remove-and-recreate, either of which would detach a file-level watch.
//! Reload outcomes are reported on two independent channels (`events` for
//! successful reloads, `errors` for parse failures) so observers can
//! subscribe without the request-handling path ever reading from them.

use super::{Config, ConfigStore};
use crate::error::ConfigError;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, FileIdMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Emitted on every successful reload. Purely informational — tests and
/// observers may subscribe, but the request-handling path never reads from
/// this channel.
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    pub allow_list_len: usize,
    pub at: Instant,
}

/// Emitted when a reload attempt fails to parse. The previous `Config` is
/// left untouched; this is a notification, not a command to retry.
#[derive(Debug, Clone)]
pub struct ReloadFailure {
    pub message: String,
    pub at: Instant,
}

pub struct ConfigWatcher {
    debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
    watched_dir: PathBuf,
}

impl ConfigWatcher {
    /// Starts watching `config_path`'s parent directory. Returns before any
    /// event has been emitted, so a caller can fail fast on a missing
    /// directory or an underlying OS watch failure.
    pub fn start(
        config_path: &Path,
        store: Arc<ConfigStore>,
        debounce: Duration,
    ) -> Result<(Self, mpsc::Receiver<ReloadEvent>, mpsc::Receiver<ReloadFailure>), ConfigError>
    {
        let watched_dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if !watched_dir.exists() {
            return Err(ConfigError::Read(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config directory does not exist: {}", watched_dir.display()),
            )));
        }

        let (event_tx, event_rx) = mpsc::channel(16);
        let (error_tx, error_rx) = mpsc::channel(16);

        let tracked_name: OsString = config_path
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        let reload_path = config_path.to_path_buf();

        let mut debouncer = new_debouncer(
            debounce,
            None,
            move |result: std::result::Result<Vec<DebouncedEvent>, Vec<notify::Error>>| {
                match result {
                    Ok(events) => {
                        for event in events {
                            if !event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(tracked_name.as_os_str()))
                            {
                                continue;
                            }
                            handle_event(&reload_path, &event.kind, &store, &event_tx, &error_tx);
                        }
                    }
                    Err(errors) => {
                        for e in errors {
                            tracing::error!(error = %e, "config directory watcher error");
                        }
                    }
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&watched_dir, RecursiveMode::NonRecursive)?;

        tracing::info!(dir = %watched_dir.display(), "config watcher started");

        Ok((
            Self {
                debouncer,
                watched_dir,
            },
            event_rx,
            error_rx,
        ))
    }

    /// Releases the underlying OS watch. Bounded and synchronous — no
    /// background task to await, so shutdown never blocks on this call.
    pub fn stop(mut self) {
        let _ = self.debouncer.watcher().unwatch(&self.watched_dir);
        tracing::info!(dir = %self.watched_dir.display(), "config watcher stopped");
    }
}

fn handle_event(
    config_path: &Path,
    kind: &EventKind,
    store: &Arc<ConfigStore>,
    event_tx: &mpsc::Sender<ReloadEvent>,
    error_tx: &mpsc::Sender<ReloadFailure>,
) {
    match kind {
        EventKind::Remove(_) | EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
            tracing::warn!(
                path = %config_path.display(),
                "config file removed; keeping previous configuration"
            );
        }
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Other => {
            match Config::from_file(config_path) {
                Ok(new_config) => {
                    let allow_list_len = new_config.allow_list.len();
                    store.replace(new_config);
                    tracing::info!(allow_list_len, "configuration reloaded");
                    let _ = event_tx.try_send(ReloadEvent {
                        allow_list_len,
                        at: Instant::now(),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "config reload failed, keeping previous configuration");
                    let _ = error_tx.try_send(ReloadFailure {
                        message: e.to_string(),
                        at: Instant::now(),
                    });
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(path: &Path, allow_list: &[&str]) {
        let body = serde_json::json!({ "allowList": allow_list });
        fs::write(path, serde_json::to_vec(&body).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn reload_replaces_store_and_emits_event() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        write_config(&config_path, &["a"]);

        let store = Arc::new(ConfigStore::new(Config::from_file(&config_path).unwrap()));
        let (watcher, mut events, _errors) =
            ConfigWatcher::start(&config_path, store.clone(), Duration::from_millis(50)).unwrap();

        write_config(&config_path, &["a", "b"]);

        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("reload event timed out")
            .expect("event channel closed");

        assert!(store.current().is_allowed("b"));
        watcher.stop();
    }

    #[tokio::test]
    async fn invalid_reload_keeps_previous_config_and_emits_failure() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        write_config(&config_path, &["a"]);

        let store = Arc::new(ConfigStore::new(Config::from_file(&config_path).unwrap()));
        let (watcher, _events, mut errors) =
            ConfigWatcher::start(&config_path, store.clone(), Duration::from_millis(50)).unwrap();

        fs::write(&config_path, b"{not valid json").unwrap();

        tokio::time::timeout(Duration::from_secs(5), errors.recv())
            .await
            .expect("failure event timed out")
            .expect("error channel closed");

        assert!(store.current().is_allowed("a"));
        watcher.stop();
    }

    #[test]
    fn rename_of_tracked_file_is_treated_like_remove_not_a_parse_failure() {
        use notify::event::{ModifyKind, RenameMode};

        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        write_config(&config_path, &["a"]);

        let store = Arc::new(ConfigStore::new(Config::from_file(&config_path).unwrap()));
        let (event_tx, mut events) = mpsc::channel(1);
        let (error_tx, mut errors) = mpsc::channel(1);

        // Simulate the debouncer surfacing a rename-away of the tracked file
        // as Modify(Name(_)) rather than Remove — it must route the same way
        // Remove does: previous config retained, nothing on either channel.
        handle_event(
            &config_path,
            &EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &store,
            &event_tx,
            &error_tx,
        );

        assert!(events.try_recv().is_err());
        assert!(errors.try_recv().is_err());
        assert!(store.current().is_allowed("a"));
    }

    #[test]
    fn start_fails_fast_on_missing_directory() {
        let store = Arc::new(ConfigStore::new(Config::default()));
        let result = ConfigWatcher::start(
            Path::new("/nonexistent-insights-ingestd-dir/config.json"),
            store,
            Duration::from_millis(50),
        );
        assert!(result.is_err());
    }
}
