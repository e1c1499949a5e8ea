//! Hot-reload of the on-disk config file (§5 "Ruleset: swapped atomically
//! on reload"), grounded on the teacher's certificate reloader: a
//! background thread watches the file with `notify` and republishes a
//! freshly-parsed, freshly-validated snapshot through an `ArcSwap`. Unlike
//! the teacher's tokio-based reloader, this one runs on a plain
//! `std::thread` since it sits on the management plane, not the
//! dataplane (§5 dataplane workers must not block; this thread may).

use crate::config::Config;
use arc_swap::ArcSwap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

/// Owns the live `Config` snapshot and the background thread that keeps it
/// fresh. Dropping the watcher stops the background thread.
pub struct ConfigWatcher {
    current: Arc<ArcSwap<Config>>,
    _watcher: RecommendedWatcher,
    handle: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Loads `path` once synchronously, then spawns a thread that reloads
    /// it on every filesystem change notification. A reload that fails to
    /// parse or validate is logged and the previous snapshot is kept, so a
    /// bad edit never blinds the running firewall.
    pub fn spawn(path: PathBuf) -> crate::error::Result<Self> {
        let initial = super::load_from_path(&path)?;
        let current = Arc::new(ArcSwap::from_pointee(initial));

        let (tx, rx) = channel();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res| {
                if tx.send(res).is_err() {
                    // receiver thread has exited; nothing to do
                }
            })
            .map_err(|e| crate::error::ConfigError::Invalid(format!("watcher init: {e}")))?;
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| crate::error::ConfigError::Invalid(format!("watch {}: {e}", path.display())))?;

        let reload_target = current.clone();
        let reload_path = path.clone();
        let handle = std::thread::spawn(move || {
            for event in rx {
                match event {
                    Ok(ev) if ev.kind.is_modify() || ev.kind.is_create() => {
                        match super::load_from_path(&reload_path) {
                            Ok(cfg) => {
                                debug!(path = %reload_path.display(), "config reloaded");
                                reload_target.store(Arc::new(cfg));
                            }
                            Err(e) => {
                                warn!(path = %reload_path.display(), error = %e, "config reload rejected, keeping previous snapshot");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "config watch error"),
                }
            }
        });

        Ok(ConfigWatcher { current, _watcher: watcher, handle: Some(handle) })
    }

    pub fn current(&self) -> Arc<Config> {
        self.current.load_full()
    }

    pub fn snapshot_handle(&self) -> Arc<ArcSwap<Config>> {
        self.current.clone()
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        // The watcher's channel sender is dropped along with `_watcher`,
        // which closes `rx` and lets the background thread exit.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
