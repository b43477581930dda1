//! Durable file cache and forwarding loop for one North connector.
//!
//! [`FileCache::cache_file`] copies the source file into the North's own
//! cache directory and records it in SQLite before returning, so the caller
//! may delete its original immediately. A dedicated task then forwards the
//! queued files oldest-first through the North's `handle_file`, one at a
//! time.
//!
//! After a successful delivery the file is either moved to the `archive/`
//! subdirectory or removed, depending on the archive policy. Archived files
//! older than the retention window are purged periodically. A non-retryable
//! failure moves the file to `errors/` and drops its queue entry so one bad
//! file cannot block the ones behind it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::database::{CachedFile, FileDatabase};
use crate::connector::traits::NorthConnector;
use crate::core::config::CachingConfig;
use crate::core::error::Result;

/// Outcome of one forwarding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardOutcome {
    Idle,
    Sent,
    Retry,
    Dropped,
}

/// Durable file queue owned by one North connector.
pub struct FileCache {
    db: Arc<FileDatabase>,
    files_dir: PathBuf,
    flush_now: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileCache {
    /// Open the durable queue under `cache_dir` and start the forwarding
    /// task. `sent_counter` is incremented once per delivered file.
    pub fn start(
        north_id: &str,
        config: &CachingConfig,
        cache_dir: &Path,
        north: Arc<Mutex<Box<dyn NorthConnector>>>,
        sent_counter: Arc<AtomicU64>,
    ) -> Result<Self> {
        let files_dir = cache_dir.join("files");
        let archive_dir = cache_dir.join("archive");
        let errors_dir = cache_dir.join("errors");
        std::fs::create_dir_all(&files_dir)?;
        std::fs::create_dir_all(&archive_dir)?;
        std::fs::create_dir_all(&errors_dir)?;

        let db = Arc::new(FileDatabase::open(cache_dir.join("files.db"))?);
        let pending = db.count()?;
        if pending > 0 {
            info!(north_id, pending, "resuming file cache with entries from previous run");
        }

        let flush_now = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(forward_loop(
            north_id.to_string(),
            config.clone(),
            db.clone(),
            archive_dir,
            errors_dir,
            north,
            flush_now.clone(),
            cancel.clone(),
            sent_counter,
        ));

        Ok(Self {
            db,
            files_dir,
            flush_now,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Copy `source` into the cache and enqueue it.
    ///
    /// The copy carries a millisecond-timestamp prefix so repeated captures
    /// of the same filename stay distinct. Once this returns, delivery no
    /// longer depends on the original file.
    pub fn cache_file(&self, south_id: &str, source: &Path) -> Result<()> {
        let now = Utc::now();
        let basename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let cached_path = self
            .files_dir
            .join(format!("{}-{}", now.timestamp_millis(), basename));

        std::fs::copy(source, &cached_path)?;
        self.db.append(now, south_id, &cached_path)?;
        self.flush_now.notify_one();
        Ok(())
    }

    /// Number of files currently queued.
    pub fn count(&self) -> Result<usize> {
        self.db.count()
    }

    /// Stop the forwarding task, leaving the queue intact. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn forward_loop(
    north_id: String,
    config: CachingConfig,
    db: Arc<FileDatabase>,
    archive_dir: PathBuf,
    errors_dir: PathBuf,
    north: Arc<Mutex<Box<dyn NorthConnector>>>,
    flush_now: Arc<Notify>,
    cancel: CancellationToken,
    sent_counter: Arc<AtomicU64>,
) {
    let send_interval = Duration::from_millis(config.send_interval_ms);
    let retry_interval = Duration::from_millis(config.retry_interval_ms);
    let mut retrying = false;

    loop {
        let wait = if retrying { retry_interval } else { send_interval };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
            _ = flush_now.notified(), if !retrying => {}
        }

        // Drain everything that is ready, one file per attempt, but yield
        // back to the select so a stop request is picked up between files.
        let outcome = forward_once(
            &north_id,
            &config,
            &db,
            &archive_dir,
            &errors_dir,
            &north,
            &sent_counter,
        )
        .await;
        retrying = outcome == ForwardOutcome::Retry;
        if outcome == ForwardOutcome::Sent || outcome == ForwardOutcome::Dropped {
            flush_now.notify_one();
        }

        if config.archive.enabled && config.archive.retention_duration_hours > 0 {
            purge_archive(&north_id, &archive_dir, config.archive.retention_duration_hours);
        }
    }

    debug!(north_id, "file forward task stopped");
}

async fn forward_once(
    north_id: &str,
    config: &CachingConfig,
    db: &FileDatabase,
    archive_dir: &Path,
    errors_dir: &Path,
    north: &Mutex<Box<dyn NorthConnector>>,
    sent_counter: &AtomicU64,
) -> ForwardOutcome {
    let entry: CachedFile = match db.read_oldest(1) {
        Ok(mut batch) if !batch.is_empty() => batch.remove(0),
        Ok(_) => return ForwardOutcome::Idle,
        Err(e) => {
            error!(north_id, error = %e, "cannot read file cache");
            return ForwardOutcome::Retry;
        }
    };

    let path = entry.path.clone();
    if !path.exists() {
        warn!(north_id, path = %path.display(), "queued file vanished from cache, dropping entry");
        let _ = db.delete_by_ids(&[entry.id]);
        return ForwardOutcome::Dropped;
    }

    let mut guard = north.lock().await;
    match guard.handle_file(&path).await {
        Ok(()) => {
            drop(guard);
            if let Err(e) = db.delete_by_ids(&[entry.id]) {
                error!(north_id, error = %e, "delivered file could not be purged from queue");
                return ForwardOutcome::Retry;
            }
            settle_delivered(north_id, &path, archive_dir, config.archive.enabled);
            sent_counter.fetch_add(1, Ordering::Relaxed);
            debug!(north_id, path = %path.display(), "file delivered");
            ForwardOutcome::Sent
        }
        Err(e) => {
            let retry = guard.should_retry(&e);
            drop(guard);
            if retry {
                warn!(north_id, path = %path.display(), error = %e, "file delivery failed, will retry");
                ForwardOutcome::Retry
            } else {
                error!(north_id, path = %path.display(), error = %e, "file rejected, moving to errors");
                if let Some(name) = path.file_name() {
                    let target = errors_dir.join(name);
                    if let Err(move_err) = std::fs::rename(&path, &target) {
                        warn!(north_id, error = %move_err, "cannot move rejected file");
                    }
                }
                if let Err(purge_err) = db.delete_by_ids(&[entry.id]) {
                    error!(north_id, error = %purge_err, "cannot drop rejected file entry");
                    return ForwardOutcome::Retry;
                }
                ForwardOutcome::Dropped
            }
        }
    }
}

fn settle_delivered(north_id: &str, path: &Path, archive_dir: &Path, archive_enabled: bool) {
    if archive_enabled {
        if let Some(name) = path.file_name() {
            let target = archive_dir.join(name);
            if let Err(e) = std::fs::rename(path, &target) {
                warn!(north_id, error = %e, "cannot archive delivered file");
            }
        }
    } else if let Err(e) = std::fs::remove_file(path) {
        warn!(north_id, error = %e, "cannot remove delivered file");
    }
}

/// Remove archived files whose modification time is past the retention
/// window.
fn purge_archive(north_id: &str, archive_dir: &Path, retention_hours: u64) {
    let cutoff = Duration::from_secs(retention_hours * 3600);
    let entries = match std::fs::read_dir(archive_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age > cutoff)
            .unwrap_or(false);
        if expired {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(north_id, error = %e, "cannot purge archived file");
            } else {
                debug!(north_id, path = %entry.path().display(), "archived file purged");
            }
        }
    }
}
