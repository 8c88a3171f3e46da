//! Admission-policy configuration: the allow-list of recognized application
//! names, and the base storage directory reports are written under.
//!
//! Serialized as a JSON object with one required key (`allowList`).
//! Duplicates collapse, order is irrelevant, and a reserved-name filter
//! (empty string, `.`, `..`, anything containing `..`) is applied at load
//! time so a malicious or malformed entry in the file can never become a
//! path-traversal primitive downstream in the upload pipeline.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub mod store;
pub mod watcher;

pub use store::ConfigStore;
pub use watcher::{ConfigWatcher, ReloadEvent, ReloadFailure};

/// Lookup set of recognized application names. Backed by `BTreeSet` for
/// O(log n) membership tests and a deterministic iteration order;
/// construction order is irrelevant.
pub type AllowList = BTreeSet<String>;

/// The in-memory representation of the admission policy. Immutable once
/// built: reloads construct a brand new `Config` and hand it to
/// [`ConfigStore::replace`] as a whole, never mutate one in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub allow_list: AllowList,
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "allowList", default)]
    allow_list: Vec<String>,
    #[serde(default)]
    base_dir: Option<PathBuf>,
}

impl Config {
    /// Load and parse a config file, applying the reserved-name filter to
    /// the allow-list. Used both for the synchronous startup load (fatal on
    /// failure) and for each reload attempt inside [`ConfigWatcher`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content)?;
        Ok(Self {
            allow_list: raw
                .allow_list
                .into_iter()
                .filter(|name| is_permitted_name(name))
                .collect(),
            base_dir: raw.base_dir,
        })
    }

    pub fn is_allowed(&self, app: &str) -> bool {
        self.allow_list.contains(app)
    }
}

/// Excludes administrative path segments from the allow-list at load time:
/// empty string, `.`, `..`, and any name containing `..` anywhere (not just
/// as a whole segment, since the allow-list entry becomes one path
/// component under `BaseDir`).
fn is_permitted_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains("..")
}
