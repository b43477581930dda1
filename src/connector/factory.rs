//! Connector construction from configuration.
//!
//! The factory turns a validated configuration block into a boxed
//! connector instance. It owns the collaborators shared by the built-in
//! connectors (outbound transport, credential decrypter) so they can be
//! swapped wholesale in tests or embeddings.

use std::path::Path;
use std::sync::Arc;

use crate::connector::north_console::ConsoleNorth;
use crate::connector::north_file_writer::FileWriterNorth;
use crate::connector::north_http::HttpNorth;
use crate::connector::south_folder_scanner::FolderScannerSouth;
use crate::connector::south_simulator::SimulatorSouth;
use crate::connector::traits::{NorthConnector, SouthConnector};
use crate::core::config::{NorthConfig, SouthConfig};
use crate::core::error::{EngineError, Result};
use crate::core::metadata::connector_registry;
use crate::transport::{CredentialDecrypter, HttpTransport, PlainTextCredentials, Transport};

/// Builds connector instances for the engine.
pub struct ConnectorFactory {
    transport: Arc<dyn Transport>,
    decrypter: Arc<dyn CredentialDecrypter>,
}

impl Default for ConnectorFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorFactory {
    /// Factory with the production collaborators.
    pub fn new() -> Self {
        Self {
            transport: Arc::new(HttpTransport::new()),
            decrypter: Arc::new(PlainTextCredentials),
        }
    }

    /// Substitute the outbound transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Substitute the credential decrypter.
    pub fn with_decrypter(mut self, decrypter: Arc<dyn CredentialDecrypter>) -> Self {
        self.decrypter = decrypter;
        self
    }

    /// Instantiate a South connector. `cache_dir` is the engine cache
    /// folder, used by connectors that keep local bookkeeping.
    pub fn create_south(
        &self,
        config: &SouthConfig,
        cache_dir: &Path,
    ) -> Result<Box<dyn SouthConnector>> {
        match config.connector_type.to_ascii_lowercase().as_str() {
            "simulator" => Ok(Box::new(SimulatorSouth::from_config(config)?)),
            "folder-scanner" => Ok(Box::new(FolderScannerSouth::from_config(config, cache_dir)?)),
            other => Err(unknown_type("south", other)),
        }
    }

    /// Instantiate a North connector.
    pub fn create_north(&self, config: &NorthConfig) -> Result<Box<dyn NorthConnector>> {
        match config.connector_type.to_ascii_lowercase().as_str() {
            "console" => Ok(Box::new(ConsoleNorth::from_config(config)?)),
            "file-writer" => Ok(Box::new(FileWriterNorth::from_config(config)?)),
            "http" => Ok(Box::new(HttpNorth::from_config(
                config,
                self.transport.clone(),
                self.decrypter.clone(),
            )?)),
            other => Err(unknown_type("north", other)),
        }
    }
}

fn unknown_type(side: &str, requested: &str) -> EngineError {
    let known: Vec<&str> = connector_registry()
        .connectors()
        .iter()
        .map(|meta| meta.name)
        .collect();
    EngineError::Config(format!(
        "unknown {side} connector type '{requested}' (known: {})",
        known.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CachingConfig;

    #[test]
    fn test_creates_every_builtin_type() {
        let factory = ConnectorFactory::new();
        let cache = tempfile::tempdir().unwrap();
        let input = tempfile::tempdir().unwrap();

        let simulator = SouthConfig {
            id: "s1".to_string(),
            name: "s1".to_string(),
            connector_type: "simulator".to_string(),
            enabled: true,
            scan_mode: Some("fast".to_string()),
            points: Vec::new(),
            settings: serde_json::Value::Null,
        };
        assert!(factory.create_south(&simulator, cache.path()).is_ok());

        let scanner = SouthConfig {
            connector_type: "folder-scanner".to_string(),
            settings: serde_json::json!({ "inputFolder": input.path() }),
            ..simulator.clone()
        };
        assert!(factory.create_south(&scanner, cache.path()).is_ok());

        for (kind, settings) in [
            ("console", serde_json::Value::Null),
            ("file-writer", serde_json::json!({ "outputFolder": cache.path().join("out") })),
            ("http", serde_json::json!({ "url": "http://sink" })),
        ] {
            let north = NorthConfig {
                id: "n1".to_string(),
                name: "n1".to_string(),
                connector_type: kind.to_string(),
                enabled: true,
                subscribed_to: Vec::new(),
                caching: CachingConfig::default(),
                settings,
            };
            assert!(factory.create_north(&north).is_ok(), "type {kind}");
        }
    }

    #[test]
    fn test_type_lookup_is_case_insensitive() {
        let factory = ConnectorFactory::new();
        let north = NorthConfig {
            id: "n1".to_string(),
            name: "n1".to_string(),
            connector_type: "Console".to_string(),
            enabled: true,
            subscribed_to: Vec::new(),
            caching: CachingConfig::default(),
            settings: serde_json::Value::Null,
        };
        assert!(factory.create_north(&north).is_ok());
    }

    #[test]
    fn test_unknown_type_lists_known_connectors() {
        let factory = ConnectorFactory::new();
        let north = NorthConfig {
            id: "n1".to_string(),
            name: "n1".to_string(),
            connector_type: "mqtt".to_string(),
            enabled: true,
            subscribed_to: Vec::new(),
            caching: CachingConfig::default(),
            settings: serde_json::Value::Null,
        };
        let error = factory.create_north(&north).err().unwrap();
        let message = error.to_string();
        assert!(message.contains("mqtt") && message.contains("console"));
    }
}
