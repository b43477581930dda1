//! Durable value cache and flush loop for one North connector.
//!
//! Values enqueued through [`ValueCache::cache_values`] land in SQLite before
//! the call returns; delivery happens later from a dedicated flush task, so a
//! South connector never blocks on a slow sink. The flush task is the only
//! reader of the queue, which guarantees at most one in-flight delivery
//! attempt per North at any time.
//!
//! Flush cycle: every `send_interval` while idle (or immediately once the
//! queue reaches `group_count`), read up to `max_send_count` oldest entries
//! and invoke the North's `handle_values`. On success the exact entries are
//! purged; on a retryable failure they stay in place and the next attempt
//! runs after `retry_interval`; on a non-retryable failure the batch is
//! logged and dropped so a poison batch cannot stall the queue.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::database::ValueDatabase;
use crate::connector::traits::NorthConnector;
use crate::core::config::CachingConfig;
use crate::core::data::DataValue;
use crate::core::error::Result;

/// Outcome of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushOutcome {
    /// Nothing queued.
    Idle,
    /// Batch delivered and purged.
    Sent,
    /// Retryable failure, batch kept, reschedule after retry interval.
    Retry,
    /// Non-retryable failure, batch dropped.
    Dropped,
}

/// Durable value cache owned by one North connector.
pub struct ValueCache {
    db: Arc<ValueDatabase>,
    group_count: usize,
    flush_now: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ValueCache {
    /// Open the durable queue under `cache_dir` and start the flush task.
    ///
    /// `north` is the owning connector; its `handle_values` is invoked only
    /// from the task spawned here. `sent_counter` is incremented by the
    /// number of values delivered, for status aggregation.
    pub fn start(
        north_id: &str,
        config: &CachingConfig,
        cache_dir: &Path,
        north: Arc<Mutex<Box<dyn NorthConnector>>>,
        sent_counter: Arc<AtomicU64>,
    ) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let db = Arc::new(ValueDatabase::open(cache_dir.join("values.db"))?);

        let pending = db.count()?;
        if pending > 0 {
            info!(north_id, pending, "resuming value cache with entries from previous run");
        }

        let flush_now = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(flush_loop(
            north_id.to_string(),
            config.clone(),
            db.clone(),
            north,
            flush_now.clone(),
            cancel.clone(),
            sent_counter,
        ));

        Ok(Self {
            db,
            group_count: config.group_count,
            flush_now,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Append values to the durable queue.
    ///
    /// Returns once the entries are persisted. Reaching `group_count`
    /// pending entries wakes the flush task immediately.
    pub fn cache_values(&self, values: &[DataValue]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.db.append(values)?;
        if self.db.count()? >= self.group_count {
            self.flush_now.notify_one();
        }
        Ok(())
    }

    /// Number of values currently queued.
    pub fn count(&self) -> Result<usize> {
        self.db.count()
    }

    /// Stop the flush task. The durable queue is left intact for the next
    /// run. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

async fn flush_loop(
    north_id: String,
    config: CachingConfig,
    db: Arc<ValueDatabase>,
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
            // Group-count trigger; suppressed while backing off after a
            // failure so the retry interval is honored.
            _ = flush_now.notified(), if !retrying => {}
        }

        let outcome = flush_once(&north_id, &config, &db, &north, &sent_counter).await;
        retrying = outcome == FlushOutcome::Retry;
    }

    debug!(north_id, "value flush task stopped");
}

async fn flush_once(
    north_id: &str,
    config: &CachingConfig,
    db: &ValueDatabase,
    north: &Mutex<Box<dyn NorthConnector>>,
    sent_counter: &AtomicU64,
) -> FlushOutcome {
    let batch = match db.read_oldest(config.max_send_count) {
        Ok(batch) => batch,
        Err(e) => {
            error!(north_id, error = %e, "cannot read value cache");
            return FlushOutcome::Retry;
        }
    };
    if batch.is_empty() {
        return FlushOutcome::Idle;
    }

    let values: Vec<DataValue> = batch.iter().map(|entry| entry.value.clone()).collect();
    let ids: Vec<i64> = batch.iter().map(|entry| entry.id).collect();

    let mut guard = north.lock().await;
    match guard.handle_values(&values).await {
        Ok(()) => {
            drop(guard);
            if let Err(e) = db.delete_by_ids(&ids) {
                // Entries will be re-sent next cycle: at-least-once, never lost.
                error!(north_id, error = %e, "delivered batch could not be purged");
                return FlushOutcome::Retry;
            }
            sent_counter.fetch_add(values.len() as u64, Ordering::Relaxed);
            debug!(north_id, count = values.len(), "value batch delivered");
            FlushOutcome::Sent
        }
        Err(e) => {
            let retry = guard.should_retry(&e);
            drop(guard);
            if retry {
                warn!(north_id, count = values.len(), error = %e, "value delivery failed, will retry");
                FlushOutcome::Retry
            } else {
                error!(north_id, count = values.len(), error = %e, "value batch rejected, dropping");
                if let Err(purge_err) = db.delete_by_ids(&ids) {
                    error!(north_id, error = %purge_err, "cannot drop rejected batch");
                    return FlushOutcome::Retry;
                }
                FlushOutcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// North whose handle_values follows a script of outcomes, recording
    /// every received batch.
    struct ScriptedNorth {
        script: StdMutex<VecDeque<std::result::Result<(), EngineError>>>,
        batches: Arc<StdMutex<Vec<Vec<DataValue>>>>,
    }

    impl ScriptedNorth {
        fn new(script: Vec<std::result::Result<(), EngineError>>) -> (Self, Arc<StdMutex<Vec<Vec<DataValue>>>>) {
            let batches = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    script: StdMutex::new(script.into()),
                    batches: batches.clone(),
                },
                batches,
            )
        }
    }

    #[async_trait]
    impl NorthConnector for ScriptedNorth {
        async fn init(&mut self) -> Result<()> {
            Ok(())
        }
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn handle_values(&mut self, values: &[DataValue]) -> Result<()> {
            self.batches.lock().unwrap().push(values.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }
        async fn handle_file(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
        fn handles_values(&self) -> bool {
            true
        }
    }

    fn fast_config() -> CachingConfig {
        CachingConfig {
            send_interval_ms: 25,
            retry_interval_ms: 50,
            group_count: 1000,
            max_send_count: 10,
            archive: Default::default(),
        }
    }

    fn start_cache(
        config: &CachingConfig,
        dir: &Path,
        north: ScriptedNorth,
    ) -> (ValueCache, Arc<AtomicU64>) {
        let counter = Arc::new(AtomicU64::new(0));
        let north: Arc<Mutex<Box<dyn NorthConnector>>> = Arc::new(Mutex::new(Box::new(north)));
        let cache = ValueCache::start("n1", config, dir, north, counter.clone()).unwrap();
        (cache, counter)
    }

    #[tokio::test]
    async fn test_single_value_delivered_within_one_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (north, batches) = ScriptedNorth::new(vec![]);
        let (cache, counter) = start_cache(&fast_config(), dir.path(), north);

        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        cache
            .cache_values(&[DataValue::new("p1", 42i64).with_timestamp(ts)])
            .unwrap();
        assert_eq!(cache.count().unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].point_id, "p1");
        drop(batches);

        assert_eq!(cache.count().unwrap(), 0);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        cache.stop().await;
    }

    #[tokio::test]
    async fn test_batch_bounded_and_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let (north, batches) = ScriptedNorth::new(vec![]);
        let mut config = fast_config();
        config.max_send_count = 3;
        let (cache, _) = start_cache(&config, dir.path(), north);

        // Enqueue 5 values out of chronological order
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let values: Vec<DataValue> = [4i64, 2, 5, 1, 3]
            .iter()
            .map(|i| {
                DataValue::new(format!("p{i}"), *i)
                    .with_timestamp(base + chrono::Duration::seconds(*i))
            })
            .collect();
        cache.cache_values(&values).unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;

        let batches = batches.lock().unwrap();
        assert!(batches.len() >= 2);
        // First attempt carries exactly max_send_count oldest entries
        assert_eq!(batches[0].len(), 3);
        let ids: Vec<&str> = batches[0].iter().map(|v| v.point_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
        drop(batches);

        assert_eq!(cache.count().unwrap(), 0);
        cache.stop().await;
    }

    #[tokio::test]
    async fn test_retryable_failure_preserves_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (north, batches) = ScriptedNorth::new(vec![
            Err(EngineError::Delivery("down".to_string())),
            Err(EngineError::Delivery("still down".to_string())),
            Ok(()),
        ]);
        let (cache, counter) = start_cache(&fast_config(), dir.path(), north);

        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        cache
            .cache_values(&[DataValue::new("p1", 1i64).with_timestamp(ts)])
            .unwrap();

        // Wait for first (failed) attempt, queue must be unchanged
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.count().unwrap(), 1);

        // Let the two retries play out
        tokio::time::sleep(Duration::from_millis(300)).await;

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 3);
        // The same pending batch is re-delivered on every attempt
        assert_eq!(batches[0], batches[1]);
        assert_eq!(batches[1], batches[2]);
        drop(batches);

        assert_eq!(cache.count().unwrap(), 0);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        cache.stop().await;
    }

    #[tokio::test]
    async fn test_non_retryable_failure_drops_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (north, batches) = ScriptedNorth::new(vec![Err(EngineError::Rejected(
            "malformed".to_string(),
        ))]);
        let (cache, counter) = start_cache(&fast_config(), dir.path(), north);

        cache.cache_values(&[DataValue::new("p1", 1i64)]).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        // One attempt, batch dropped, nothing delivered
        assert_eq!(batches.lock().unwrap().len(), 1);
        assert_eq!(cache.count().unwrap(), 0);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
        cache.stop().await;
    }

    #[tokio::test]
    async fn test_group_count_triggers_immediate_flush() {
        let dir = tempfile::tempdir().unwrap();
        let (north, batches) = ScriptedNorth::new(vec![]);
        let mut config = fast_config();
        // Long idle interval: only the group-count trigger can explain a
        // prompt flush.
        config.send_interval_ms = 10_000;
        config.group_count = 3;
        let (cache, _) = start_cache(&config, dir.path(), north);

        let values: Vec<DataValue> = (0..3).map(|i| DataValue::new(format!("p{i}"), i)).collect();
        cache.cache_values(&values).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(batches.lock().unwrap().len(), 1);
        assert_eq!(cache.count().unwrap(), 0);
        cache.stop().await;
    }

    #[tokio::test]
    async fn test_empty_enqueue_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (north, _) = ScriptedNorth::new(vec![]);
        let (cache, _) = start_cache(&fast_config(), dir.path(), north);

        cache.cache_values(&[]).unwrap();
        assert_eq!(cache.count().unwrap(), 0);
        cache.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (north, _) = ScriptedNorth::new(vec![]);
        let (cache, _) = start_cache(&fast_config(), dir.path(), north);

        cache.stop().await;
        cache.stop().await;
    }
}
