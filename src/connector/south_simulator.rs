//! Signal simulator South connector.
//!
//! Generates pseudo-random values for its configured points on every scan
//! tick, without touching any physical device. Useful for exercising the
//! full acquisition path (scheduler, caches, North delivery) on a machine
//! with no field equipment attached.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::connector::traits::{ConnectionState, DataSink, SouthConnector};
use crate::core::config::{PointConfig, SouthConfig};
use crate::core::data::DataValue;
use crate::core::error::{EngineError, Result};

/// Simulator parameters (deserialized from the South's `settings`).
///
/// # Example JSON
/// ```json
/// {
///     "min": 20.0,
///     "max": 80.0
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorSettings {
    /// Lower bound of generated values.
    #[serde(default = "default_min")]
    pub min: f64,

    /// Upper bound of generated values.
    #[serde(default = "default_max")]
    pub max: f64,
}

fn default_min() -> f64 {
    0.0
}

fn default_max() -> f64 {
    100.0
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            min: default_min(),
            max: default_max(),
        }
    }
}

/// South connector producing simulated readings.
pub struct SimulatorSouth {
    south_id: String,
    settings: SimulatorSettings,
    points: Vec<PointConfig>,
    connector_mode: Option<String>,
    sink: Option<Arc<dyn DataSink>>,
    state: ConnectionState,
    // xorshift state, seeded from the connector ID so runs differ per south
    rng: u64,
}

impl SimulatorSouth {
    pub fn from_config(config: &SouthConfig) -> Result<Self> {
        let settings: SimulatorSettings = if config.settings.is_null() {
            SimulatorSettings::default()
        } else {
            serde_json::from_value(config.settings.clone())
                .map_err(|e| EngineError::Config(format!("simulator settings: {e}")))?
        };
        if settings.min > settings.max {
            return Err(EngineError::Config(format!(
                "simulator min {} exceeds max {}",
                settings.min, settings.max
            )));
        }

        let seed = config
            .id
            .bytes()
            .fold(0x9E37_79B9_7F4A_7C15u64, |acc, b| {
                acc.rotate_left(5) ^ u64::from(b)
            });

        Ok(Self {
            south_id: config.id.clone(),
            settings,
            points: config.points.clone(),
            connector_mode: config.scan_mode.clone(),
            sink: None,
            state: ConnectionState::Disconnected,
            rng: seed | 1,
        })
    }

    fn next_value(&mut self) -> f64 {
        // xorshift64
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        let unit = (x >> 11) as f64 / (1u64 << 53) as f64;
        self.settings.min + unit * (self.settings.max - self.settings.min)
    }

    /// Point IDs due on this tick.
    fn points_for(&self, scan_mode: &str) -> Vec<String> {
        if self.points.is_empty() {
            // No point list: one synthetic signal on the connector's mode
            if self.connector_mode.as_deref() == Some(scan_mode) {
                vec![format!("{}.signal", self.south_id)]
            } else {
                Vec::new()
            }
        } else {
            self.points
                .iter()
                .filter(|p| p.scan_mode == scan_mode)
                .map(|p| p.point_id.clone())
                .collect()
        }
    }
}

#[async_trait]
impl SouthConnector for SimulatorSouth {
    async fn init(&mut self, sink: Arc<dyn DataSink>) -> Result<()> {
        self.sink = Some(sink);
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn on_scan(&mut self, scan_mode: &str) -> Result<()> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| EngineError::Config("simulator scanned before init".to_string()))?;

        let point_ids = self.points_for(scan_mode);
        if point_ids.is_empty() {
            return Ok(());
        }

        let values: Vec<DataValue> = point_ids
            .into_iter()
            .map(|point_id| {
                let value = self.next_value();
                DataValue::new(point_id, value)
            })
            .collect();

        debug!(south_id = %self.south_id, scan_mode, count = values.len(), "simulated values");
        sink.add_values(&self.south_id, values).await;
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }
}
