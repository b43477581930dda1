//! Connector metadata for dynamic discovery.
//!
//! Each built-in connector type registers a self-describing entry so the CLI
//! (and any embedding application) can list available types and show example
//! settings without instantiating anything.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side of the engine a connector sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    /// Acquires data from an external source.
    South,
    /// Delivers cached data to an external sink.
    North,
}

impl std::fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::South => write!(f, "south"),
            Self::North => write!(f, "north"),
        }
    }
}

/// Metadata for a connector type.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorMetadata {
    /// Type name used in configuration.
    pub name: &'static str,
    /// Human-readable display name.
    pub display_name: &'static str,
    /// Short description.
    pub description: &'static str,
    /// South or North.
    pub kind: ConnectorKind,
    /// Whether the connector handles value batches.
    pub handles_values: bool,
    /// Whether the connector handles files.
    pub handles_files: bool,
    /// Example `settings` block.
    pub example_settings: Value,
}

/// Registry of connector types known to this build.
pub struct ConnectorRegistry {
    entries: Vec<ConnectorMetadata>,
}

impl ConnectorRegistry {
    /// All registered connector types.
    pub fn connectors(&self) -> &[ConnectorMetadata] {
        &self.entries
    }

    /// Look up a connector type by name.
    pub fn find(&self, name: &str) -> Option<&ConnectorMetadata> {
        self.entries
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }
}

static REGISTRY: Lazy<ConnectorRegistry> = Lazy::new(|| ConnectorRegistry {
    entries: vec![
        ConnectorMetadata {
            name: "simulator",
            display_name: "Simulator",
            description: "Generates configured points on each scan. For testing and demos.",
            kind: ConnectorKind::South,
            handles_values: true,
            handles_files: false,
            example_settings: serde_json::json!({
                "min": 0.0,
                "max": 100.0
            }),
        },
        ConnectorMetadata {
            name: "folder-scanner",
            display_name: "Folder Scanner",
            description: "Scans a directory on each scan and forwards new or modified files.",
            kind: ConnectorKind::South,
            handles_values: false,
            handles_files: true,
            example_settings: serde_json::json!({
                "inputFolder": "./input",
                "regex": "\\.csv$",
                "preserveFiles": true
            }),
        },
        ConnectorMetadata {
            name: "console",
            display_name: "Console",
            description: "Prints received values and file names to stdout.",
            kind: ConnectorKind::North,
            handles_values: true,
            handles_files: true,
            example_settings: serde_json::json!({ "verbose": false }),
        },
        ConnectorMetadata {
            name: "file-writer",
            display_name: "File Writer",
            description: "Writes value batches as JSON files and copies handled files to a folder.",
            kind: ConnectorKind::North,
            handles_values: true,
            handles_files: true,
            example_settings: serde_json::json!({
                "outputFolder": "./output",
                "prefix": "",
                "suffix": ""
            }),
        },
        ConnectorMetadata {
            name: "http",
            display_name: "HTTP",
            description: "Posts value batches as JSON and files as raw bodies to an HTTP endpoint.",
            kind: ConnectorKind::North,
            handles_values: true,
            handles_files: true,
            example_settings: serde_json::json!({
                "url": "https://example.com/api/values",
                "authentication": { "type": "basic", "username": "user", "password": "secret" }
            }),
        },
    ],
});

/// Get the global connector registry.
pub fn connector_registry() -> &'static ConnectorRegistry {
    &REGISTRY
}
