//! Configuration reload triggers.
//!
//! Reloads the exporter when the configuration file changes or SIGHUP
//! arrives.

use crate::collector::Exporter;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Watches the configuration file and reloads the exporter.
pub struct ReloadWatcher {
    /// Path to the config file.
    config_path: PathBuf,
    /// Exporter to reload.
    exporter: Arc<Exporter>,
}

impl ReloadWatcher {
    /// Create a new watcher for the exporter's configuration file.
    pub fn new(exporter: Arc<Exporter>) -> Self {
        Self {
            config_path: exporter.config_path().to_path_buf(),
            exporter,
        }
    }

    /// Get the path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Run the watcher until shutdown.
    ///
    /// This watches for:
    /// - File changes to the config file
    /// - SIGHUP signal for manual reload
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(path = %self.config_path.display(), "config watcher starting");

        let (tx, rx) = mpsc::channel();

        let watcher_result: Result<RecommendedWatcher, _> = Watcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        );

        // Without a file watcher, SIGHUP and /reload still work.
        let mut _watcher = match watcher_result {
            Ok(mut w) => {
                let dir = watch_dir(&self.config_path);
                match w.watch(dir, RecursiveMode::NonRecursive) {
                    Ok(()) => Some(w),
                    Err(e) => {
                        error!(error = %e, dir = %dir.display(), "failed to watch config directory");
                        None
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "failed to create file watcher");
                None
            }
        };

        #[cfg(unix)]
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "failed to setup SIGHUP handler");
                None
            }
        };

        info!("config watcher ready");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    let mut changed = false;
                    while let Ok(event) = rx.try_recv() {
                        changed |= is_reload_event(&self.config_path, &event);
                    }
                    if changed {
                        info!(path = %self.config_path.display(), "configuration file changed");
                        self.reload().await;
                    }
                }

                _ = async {
                    #[cfg(unix)]
                    {
                        if let Some(ref mut sig) = sighup {
                            sig.recv().await
                        } else {
                            std::future::pending::<Option<()>>().await
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        std::future::pending::<Option<()>>().await
                    }
                } => {
                    info!("received SIGHUP, reloading configuration");
                    self.reload().await;
                }

                _ = shutdown.recv() => {
                    info!("config watcher shutting down");
                    break;
                }
            }
        }
    }

    async fn reload(&self) {
        if let Err(e) = self.exporter.load().await {
            error!(error = %e, "reload failed, keeping current configuration");
        }
    }
}

/// Directory watched for changes to `config_path`.
fn watch_dir(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Check if a file event concerns the configuration file.
pub(crate) fn is_reload_event(config_path: &Path, event: &Event) -> bool {
    let is_our_file = event
        .paths
        .iter()
        .any(|p| p.file_name() == config_path.file_name());

    let is_modify_or_create = matches!(
        event.kind,
        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
    );

    is_our_file && is_modify_or_create
}
