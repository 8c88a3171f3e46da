//! Concurrent, lock-free holder for the current [`Config`] snapshot.
//!
//! Models mutable shared state as an atomic pointer swap to an immutable
//! snapshot: `current()` never blocks a reader behind a writer, and
//! `replace()` is a single atomic store once the new `Config` is fully
//! constructed — readers never observe a partially built value.

use super::Config;
use arc_swap::ArcSwap;
use std::sync::Arc;

pub struct ConfigStore {
    inner: ArcSwap<Config>,
}

impl ConfigStore {
    pub fn new(initial: Config) -> Self {
        Self {
            inner: ArcSwap::from_pointee(initial),
        }
    }

    /// Lock-free snapshot read. Callers may hold the returned `Arc`
    /// indefinitely without blocking a concurrent `replace`.
    pub fn current(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Installs a fully-built `Config` as the new current snapshot.
    /// Concurrent readers observe either the prior snapshot or this one,
    /// never a partially constructed value.
    pub fn replace(&self, new_config: Config) {
        self.inner.store(Arc::new(new_config));
    }
}
