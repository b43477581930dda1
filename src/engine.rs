//! Engine orchestration: connector lifecycle, routing and fan-out.
//!
//! The engine owns every running connector. At start it instantiates the
//! enabled North connectors with their durable caches, then the South
//! connectors, then the scan scheduler, in that order, so data can flow the
//! moment the first scan fires. A connector that fails to start is logged
//! and skipped; it never takes the engine or its siblings down with it.
//!
//! South connectors hand data back through the [`DataSink`] they receive at
//! init. The sink fans each batch out to every subscribed North cache and
//! returns once the data is durable, long before any delivery happens.
//!
//! In safe mode the engine starts with no connectors and no scheduler at
//! all, which is how an operator recovers from a configuration that
//! crashes a connector at boot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{FileCache, ValueCache};
use crate::connector::factory::ConnectorFactory;
use crate::connector::traits::{DataSink, NorthHandle, SouthHandle};
use crate::core::config::GatewayConfig;
use crate::core::data::DataValue;
use crate::core::error::{EngineError, Result};
use crate::scheduler::{ScanRoutingTable, ScanScheduler};
use crate::status::{
    format_memory, format_uptime, CounterRegistry, ProcResourceSampler, ResourceSampler,
    StatusSnapshot,
};

// ============================================================
// Per-North runtime
// ============================================================

/// A running North connector with its caches and routing facts.
struct NorthRuntime {
    id: String,
    handles_values: bool,
    handles_files: bool,
    subscribed_to: Vec<String>,
    connector: NorthHandle,
    value_cache: Option<ValueCache>,
    file_cache: Option<FileCache>,
}

impl NorthRuntime {
    /// Empty subscription list means "every South".
    fn accepts(&self, south_id: &str) -> bool {
        self.subscribed_to.is_empty() || self.subscribed_to.iter().any(|id| id == south_id)
    }

    async fn shutdown(&self) {
        if let Some(cache) = &self.value_cache {
            cache.stop().await;
        }
        if let Some(cache) = &self.file_cache {
            cache.stop().await;
        }
        if let Err(e) = self.connector.lock().await.disconnect().await {
            warn!(north_id = %self.id, error = %e, "north disconnect failed");
        }
    }
}

// ============================================================
// Shared runtime (the engine's DataSink)
// ============================================================

/// State shared between the engine, the scheduler's South handles and any
/// embedder that pushes data directly.
struct EngineRuntime {
    name: String,
    counters: CounterRegistry,
    sampler: Arc<dyn ResourceSampler>,
    norths: std::sync::RwLock<Vec<Arc<NorthRuntime>>>,
    souths: tokio::sync::RwLock<BTreeMap<String, SouthHandle>>,
    started_at: std::sync::RwLock<Option<DateTime<Utc>>>,
}

impl EngineRuntime {
    fn new(name: impl Into<String>, sampler: Arc<dyn ResourceSampler>) -> Self {
        Self {
            name: name.into(),
            counters: CounterRegistry::new(),
            sampler,
            norths: std::sync::RwLock::new(Vec::new()),
            souths: tokio::sync::RwLock::new(BTreeMap::new()),
            started_at: std::sync::RwLock::new(None),
        }
    }

    fn norths(&self) -> Vec<Arc<NorthRuntime>> {
        self.norths
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn snapshot(&self) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot::new();
        snapshot.push("name", &self.name);

        let started_at = *self.started_at.read().unwrap_or_else(|e| e.into_inner());
        match started_at {
            Some(since) => snapshot.push("uptime", format_uptime(since, Utc::now())),
            None => snapshot.push("uptime", "stopped"),
        }

        let usage = self.sampler.sample();
        if let Some(bytes) = usage.memory_bytes {
            snapshot.push("memory", format_memory(bytes));
        }
        if let Some(load) = usage.load_average {
            snapshot.push("load", format!("{load:.2}"));
        }

        for (id, handle) in self.souths.read().await.iter() {
            let state = handle.lock().await.connection_state();
            let counters = self.counters.south(id);
            snapshot.push(format!("south.{id}.state"), state);
            snapshot.push(
                format!("south.{id}.values_received"),
                counters.values_received.load(Ordering::Relaxed),
            );
            snapshot.push(
                format!("south.{id}.files_received"),
                counters.files_received.load(Ordering::Relaxed),
            );
        }

        for north in self.norths() {
            let state = north.connector.lock().await.connection_state();
            let counters = self.counters.north(&north.id);
            snapshot.push(format!("north.{}.state", north.id), state);
            snapshot.push(
                format!("north.{}.values_sent", north.id),
                counters.values_sent.load(Ordering::Relaxed),
            );
            snapshot.push(
                format!("north.{}.files_sent", north.id),
                counters.files_sent.load(Ordering::Relaxed),
            );
            if let Some(cache) = &north.value_cache {
                snapshot.push(
                    format!("north.{}.values_cached", north.id),
                    cache.count().unwrap_or(0),
                );
            }
            if let Some(cache) = &north.file_cache {
                snapshot.push(
                    format!("north.{}.files_cached", north.id),
                    cache.count().unwrap_or(0),
                );
            }
        }

        snapshot
    }
}

#[async_trait]
impl DataSink for EngineRuntime {
    async fn add_values(&self, south_id: &str, values: Vec<DataValue>) {
        if values.is_empty() {
            return;
        }
        self.counters
            .south(south_id)
            .values_received
            .fetch_add(values.len() as u64, Ordering::Relaxed);

        for north in self.norths() {
            if !north.handles_values || !north.accepts(south_id) {
                continue;
            }
            let Some(cache) = &north.value_cache else { continue };
            if let Err(e) = cache.cache_values(&values) {
                error!(north_id = %north.id, south_id, error = %e, "cannot cache values");
            }
        }
    }

    async fn add_file(&self, south_id: &str, path: &Path, preserve_original: bool) {
        self.counters
            .south(south_id)
            .files_received
            .fetch_add(1, Ordering::Relaxed);

        // Every subscribed North must hold its own durable copy before the
        // original may be touched.
        for north in self.norths() {
            if !north.handles_files || !north.accepts(south_id) {
                continue;
            }
            let Some(cache) = &north.file_cache else { continue };
            if let Err(e) = cache.cache_file(south_id, path) {
                error!(north_id = %north.id, south_id, error = %e, "cannot cache file");
            }
        }

        if !preserve_original {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(south_id, path = %path.display(), error = %e, "cannot remove source file");
            }
        }
    }
}

// ============================================================
// Engine
// ============================================================

/// Gateway engine: builds connectors from configuration and runs them.
pub struct Engine {
    config: GatewayConfig,
    factory: ConnectorFactory,
    runtime: Arc<EngineRuntime>,
    scheduler: Option<ScanScheduler>,
    health: Option<(CancellationToken, JoinHandle<()>)>,
    running: bool,
}

impl Engine {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_factory(config, ConnectorFactory::new())
    }

    /// Engine with a custom factory (swapped transport, decrypter, ...).
    pub fn with_factory(config: GatewayConfig, factory: ConnectorFactory) -> Self {
        let runtime = Arc::new(EngineRuntime::new(
            config.engine.name.clone(),
            Arc::new(ProcResourceSampler),
        ));
        Self {
            config,
            factory,
            runtime,
            scheduler: None,
            health: None,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn cache_root(&self) -> PathBuf {
        self.config.engine.cache_folder.clone()
    }

    /// Start the engine.
    ///
    /// In safe mode only the status reporting runs; no connector is
    /// instantiated. Otherwise Norths come up first (with their caches),
    /// then Souths, then the scan scheduler. Individual connector failures
    /// are logged and skipped. Calling start on a running engine is a
    /// no-op.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            warn!("engine already running");
            return Ok(());
        }

        let name = self.config.engine.name.clone();
        std::fs::create_dir_all(self.cache_root())?;
        *self
            .runtime
            .started_at
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());

        if self.config.engine.safe_mode {
            warn!(engine = %name, "starting in safe mode, no connector will run");
        } else {
            self.start_norths().await;
            self.start_souths().await;

            let table = ScanRoutingTable::build(
                &self.config.engine.scan_modes,
                &self.config.south,
            );
            let souths = self.runtime.souths.read().await.clone();
            self.scheduler = Some(ScanScheduler::start(&table, &souths));
        }

        self.start_health_task();
        self.running = true;
        info!(engine = %name, safe_mode = self.config.engine.safe_mode, "engine started");
        Ok(())
    }

    /// Stop the engine: scheduler first (no new scans, in-flight ticks run
    /// to completion), then Souths, then the caches and Norths. Queued data
    /// stays on disk for the next run. Idempotent.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }

        if let Some((cancel, task)) = self.health.take() {
            cancel.cancel();
            let _ = task.await;
        }

        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }

        let souths = std::mem::take(&mut *self.runtime.souths.write().await);
        join_all(souths.into_iter().map(|(id, handle)| async move {
            if let Err(e) = handle.lock().await.disconnect().await {
                warn!(south_id = %id, error = %e, "south disconnect failed");
            }
        }))
        .await;

        let norths = std::mem::take(
            &mut *self.runtime.norths.write().unwrap_or_else(|e| e.into_inner()),
        );
        join_all(norths.iter().map(|north| north.shutdown())).await;

        *self
            .runtime
            .started_at
            .write()
            .unwrap_or_else(|e| e.into_inner()) = None;
        self.running = false;
        info!(engine = %self.config.engine.name, "engine stopped");
    }

    /// Current status as an ordered list of display entries.
    pub async fn status(&self) -> StatusSnapshot {
        self.runtime.snapshot().await
    }

    /// Push values into the engine from outside a South connector, e.g.
    /// from an embedding application. Same fan-out as a South push.
    pub async fn add_values(&self, south_id: &str, values: Vec<DataValue>) {
        self.runtime.add_values(south_id, values).await;
    }

    /// Push a file into the engine from outside a South connector.
    pub async fn add_file(&self, south_id: &str, path: &Path, preserve_original: bool) {
        self.runtime.add_file(south_id, path, preserve_original).await;
    }

    async fn start_norths(&self) {
        let cache_root = self.cache_root();

        // Fault-isolating join: every outcome is collected, a failing
        // connector never aborts its siblings.
        let cache_root = &cache_root;
        let outcomes = join_all(self.config.north.iter().filter(|n| n.enabled).map(
            |config| async move {
                (config.id.clone(), self.start_north(config, cache_root).await)
            },
        ))
        .await;

        let mut started = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(runtime) => started.push(Arc::new(runtime)),
                Err(e) => {
                    error!(north_id = %id, error = %e, "north failed to start, skipping");
                }
            }
        }

        info!(count = started.len(), "north connectors started");
        *self
            .runtime
            .norths
            .write()
            .unwrap_or_else(|e| e.into_inner()) = started;
    }

    async fn start_north(
        &self,
        config: &crate::core::config::NorthConfig,
        cache_root: &Path,
    ) -> Result<NorthRuntime> {
        let mut connector = self.factory.create_north(config)?;
        connector.init().await?;
        let handles_values = connector.handles_values();
        let handles_files = connector.handles_files();
        if !handles_values && !handles_files {
            return Err(EngineError::Config(
                "connector handles neither values nor files".to_string(),
            ));
        }

        // A connection failure at boot is not fatal: the caches hold the
        // data and delivery retries once the sink comes back.
        if let Err(e) = connector.connect().await {
            warn!(north_id = %config.id, error = %e, "north connect failed, deliveries will retry");
        }

        let handle: NorthHandle = Arc::new(Mutex::new(connector));
        let cache_dir = cache_root.join(&config.id);
        let counters = self.runtime.counters.north(&config.id);

        let value_cache = if handles_values {
            Some(ValueCache::start(
                &config.id,
                &config.caching,
                &cache_dir,
                handle.clone(),
                counters.values_sent.clone(),
            )?)
        } else {
            None
        };
        let file_cache = if handles_files {
            Some(FileCache::start(
                &config.id,
                &config.caching,
                &cache_dir,
                handle.clone(),
                counters.files_sent.clone(),
            )?)
        } else {
            None
        };

        debug!(north_id = %config.id, handles_values, handles_files, "north started");
        Ok(NorthRuntime {
            id: config.id.clone(),
            handles_values,
            handles_files,
            subscribed_to: config.subscribed_to.clone(),
            connector: handle,
            value_cache,
            file_cache,
        })
    }

    async fn start_souths(&self) {
        let cache_root = self.cache_root();
        let sink: Arc<dyn DataSink> = self.runtime.clone();

        let outcomes = join_all(self.config.south.iter().filter(|s| s.enabled).map(|config| {
            let sink = sink.clone();
            let cache_root = cache_root.clone();
            async move {
                let result = async {
                    let mut connector = self.factory.create_south(config, &cache_root)?;
                    connector.init(sink).await?;
                    connector.connect().await?;
                    Ok::<_, EngineError>(connector)
                }
                .await;
                (config.id.clone(), result)
            }
        }))
        .await;

        let mut started = BTreeMap::new();
        for (id, result) in outcomes {
            match result {
                Ok(connector) => {
                    let handle: SouthHandle = Arc::new(Mutex::new(connector));
                    debug!(south_id = %id, "south started");
                    started.insert(id, handle);
                }
                Err(e) => {
                    error!(south_id = %id, error = %e, "south failed to start, skipping");
                }
            }
        }

        info!(count = started.len(), "south connectors started");
        *self.runtime.souths.write().await = started;
    }

    fn start_health_task(&mut self) {
        let interval = std::time::Duration::from_millis(self.config.engine.status_interval_ms);
        let runtime = self.runtime.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let snapshot = runtime.snapshot().await;
                info!(status = %snapshot, "engine health");
            }
        });

        self.health = Some((cancel, task));
    }
}
