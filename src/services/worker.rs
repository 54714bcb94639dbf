use crate::services::cleanup;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodically removes staged files left behind by crashed requests.
pub struct StagingSweeper {
    root: PathBuf,
    max_age: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl StagingSweeper {
    pub fn new(root: PathBuf, max_age: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            root,
            max_age,
            interval: Duration::from_secs(3600),
            shutdown,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Staging sweeper started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    sweep(&self.root, self.max_age).await;
                }
            }
        }
    }
}

/// Deletes regular files under `root` older than `max_age`. Returns how many were removed.
pub async fn sweep(root: &Path, max_age: Duration) -> usize {
    tracing::debug!("🧹 Sweeping stale staged files in {}", root.display());

    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot read staging directory {}: {}", root.display(), e);
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to list staging directory: {}", e);
                break;
            }
        };

        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();

        if age >= max_age && cleanup::remove(&entry.path()).await {
            tracing::info!("Removed stale staged file: {}", entry.path().display());
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::info!("🧹 Swept {} stale staged file(s)", removed);
    }
    removed
}
