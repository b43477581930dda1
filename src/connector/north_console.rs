//! Console North connector.
//!
//! Writes everything it receives to standard output. Meant for smoke tests
//! and commissioning: point a South at it and watch the data flow without
//! standing up a real sink.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::connector::traits::NorthConnector;
use crate::core::config::NorthConfig;
use crate::core::data::DataValue;
use crate::core::error::{EngineError, Result};

/// Console parameters (deserialized from the North's `settings`).
///
/// # Example JSON
/// ```json
/// {
///     "verbose": true
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsoleSettings {
    /// Print every value; otherwise only batch summaries.
    #[serde(default)]
    pub verbose: bool,
}

/// North connector printing to stdout.
pub struct ConsoleNorth {
    north_id: String,
    settings: ConsoleSettings,
    subscribed_to: Vec<String>,
}

impl ConsoleNorth {
    pub fn from_config(config: &NorthConfig) -> Result<Self> {
        let settings: ConsoleSettings = if config.settings.is_null() {
            ConsoleSettings::default()
        } else {
            serde_json::from_value(config.settings.clone())
                .map_err(|e| EngineError::Config(format!("console settings: {e}")))?
        };
        Ok(Self {
            north_id: config.id.clone(),
            settings,
            subscribed_to: config.subscribed_to.clone(),
        })
    }
}

#[async_trait]
impl NorthConnector for ConsoleNorth {
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
        if self.settings.verbose {
            for value in values {
                println!(
                    "[{}] {} {} = {} ({})",
                    self.north_id,
                    value.timestamp.to_rfc3339(),
                    value.point_id,
                    serde_json::to_string(&value.data.value)?,
                    value.data.quality
                );
            }
        } else {
            println!("[{}] {} values", self.north_id, values.len());
        }
        Ok(())
    }

    async fn handle_file(&mut self, path: &Path) -> Result<()> {
        let size = std::fs::metadata(path)?.len();
        println!("[{}] file {} ({} bytes)", self.north_id, path.display(), size);
        Ok(())
    }

    fn handles_values(&self) -> bool {
        true
    }

    fn handles_files(&self) -> bool {
        true
    }

    fn subscribed_to(&self) -> &[String] {
        &self.subscribed_to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CachingConfig;

    fn config(settings: serde_json::Value) -> NorthConfig {
        NorthConfig {
            id: "console1".to_string(),
            name: "Console".to_string(),
            connector_type: "console".to_string(),
            enabled: true,
            subscribed_to: vec!["sim1".to_string()],
            caching: CachingConfig::default(),
            settings,
        }
    }

    #[tokio::test]
    async fn test_accepts_values_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "hello").unwrap();

        let mut north = ConsoleNorth::from_config(&config(serde_json::json!({ "verbose": true })))
            .unwrap();
        north.init().await.unwrap();

        north
            .handle_values(&[DataValue::new("p1", 1.5f64)])
            .await
            .unwrap();
        north.handle_file(&file).await.unwrap();
        assert!(north.handles_values() && north.handles_files());
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let mut north = ConsoleNorth::from_config(&config(serde_json::Value::Null)).unwrap();
        assert!(north.handle_file(Path::new("/nonexistent/f")).await.is_err());
    }

    #[test]
    fn test_subscription_list_exposed() {
        let north = ConsoleNorth::from_config(&config(serde_json::Value::Null)).unwrap();
        assert_eq!(north.subscribed_to(), &["sim1".to_string()]);
    }
}
