//! Gateway configuration model.
//!
//! The configuration file is TOML, consumed at startup and never mutated
//! during a run. Connector `settings` stay an opaque [`serde_json::Value`]
//! parsed by each connector implementation, so new connector types need no
//! change here.
//!
//! # Example
//!
//! ```toml
//! [engine]
//! name = "plant-gateway"
//!
//! [[engine.scan_modes]]
//! scan_mode = "every-second"
//! cron = "* * * * * *"
//!
//! [[south]]
//! id = "s1"
//! name = "Simulator"
//! type = "simulator"
//! scan_mode = "every-second"
//!
//! [[north]]
//! id = "n1"
//! name = "Console"
//! type = "console"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, Result};

/// Reserved scan mode for push-based South connectors; never scheduled.
pub const LISTEN_MODE: &str = "listen";

/// A named polling cadence with a cron trigger (seconds granularity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanModeConfig {
    /// Scan mode identifier referenced by South connectors.
    pub scan_mode: String,

    /// Cron expression, e.g. `"*/10 * * * * *"` for every ten seconds.
    pub cron: String,
}

/// Engine-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Gateway instance name, reported in the status snapshot.
    pub name: String,

    /// Start without activating any connector.
    #[serde(default)]
    pub safe_mode: bool,

    /// Root directory for the per-North durable caches.
    #[serde(default = "default_cache_folder")]
    pub cache_folder: PathBuf,

    /// Period of the status refresh and health signal, in milliseconds.
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    /// Declared scan modes.
    #[serde(default)]
    pub scan_modes: Vec<ScanModeConfig>,
}

fn default_cache_folder() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_status_interval_ms() -> u64 {
    5000
}

/// A point declared by a South connector with its own cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointConfig {
    /// Point identifier.
    pub point_id: String,

    /// Scan mode for this point. `listen` means the connector pushes
    /// asynchronously and the point is excluded from scheduling.
    pub scan_mode: String,
}

/// Configuration of one South connector instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SouthConfig {
    /// Unique connector id, used as data origin marker.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Connector type resolved by the factory.
    #[serde(rename = "type")]
    pub connector_type: String,

    /// Disabled connectors are never instantiated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Single scan mode for the whole connector. Mutually exclusive with
    /// per-point modes in `points`.
    #[serde(default)]
    pub scan_mode: Option<String>,

    /// Per-point scan mode assignment.
    #[serde(default)]
    pub points: Vec<PointConfig>,

    /// Connector-specific settings, parsed by the implementation.
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// File archive policy applied after successful delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Keep delivered files in an archive folder instead of deleting them.
    #[serde(default)]
    pub enabled: bool,

    /// How long archived files are retained, in hours. 0 keeps them forever.
    #[serde(default = "default_retention_hours")]
    pub retention_duration_hours: u64,
}

fn default_retention_hours() -> u64 {
    720
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_duration_hours: default_retention_hours(),
        }
    }
}

/// Cache and retry parameters of one North connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingConfig {
    /// Flush period while the queue is idle, in milliseconds.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,

    /// Delay before re-attempting a failed flush, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Buffered value count that triggers an immediate flush.
    #[serde(default = "default_group_count")]
    pub group_count: usize,

    /// Upper bound on the number of values delivered per attempt.
    #[serde(default = "default_max_send_count")]
    pub max_send_count: usize,

    /// Archive policy for delivered files.
    #[serde(default)]
    pub archive: ArchiveConfig,
}

fn default_send_interval_ms() -> u64 {
    10_000
}

fn default_retry_interval_ms() -> u64 {
    5_000
}

fn default_group_count() -> usize {
    1_000
}

fn default_max_send_count() -> usize {
    10_000
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            send_interval_ms: default_send_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            group_count: default_group_count(),
            max_send_count: default_max_send_count(),
            archive: ArchiveConfig::default(),
        }
    }
}

/// Configuration of one North connector instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NorthConfig {
    /// Unique connector id.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Connector type resolved by the factory.
    #[serde(rename = "type")]
    pub connector_type: String,

    /// Disabled connectors are never instantiated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// South ids this North accepts data from. Empty means all.
    #[serde(default)]
    pub subscribed_to: Vec<String>,

    /// Cache and retry parameters.
    #[serde(default)]
    pub caching: CachingConfig,

    /// Connector-specific settings, parsed by the implementation.
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

/// Full gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Engine-level settings.
    pub engine: EngineConfig,

    /// South connector declarations.
    #[serde(default)]
    pub south: Vec<SouthConfig>,

    /// North connector declarations.
    #[serde(default)]
    pub north: Vec<NorthConfig>,
}

impl GatewayConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| EngineError::Config(format!("invalid configuration: {}", e)))
    }

    /// Load a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }
}
