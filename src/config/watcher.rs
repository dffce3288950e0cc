//! Configuration file watcher.
//!
//! Reloads the guard configuration when its file changes. Only configurations
//! that parse and validate are forwarded; a broken edit keeps the running
//! policy in place. The consumer decides which sections it applies live
//! (currently the SSRF allow-list).

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GuardConfig;

/// Watches one configuration file and publishes validated reloads.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<GuardConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for reloaded configs.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                updates,
            },
            rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, updates } = self;
        let reload_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&reload_path) {
                        Ok(config) => {
                            tracing::info!(path = ?reload_path, "Guard configuration reloaded");
                            let _ = updates.send(config.with_env_profile());
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Rejected configuration reload; keeping current policy");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Configuration watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Configuration watcher started");
        Ok(watcher)
    }
}
