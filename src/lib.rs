//! # Fluxgate
//!
//! An industrial data gateway: scheduled acquisition from South connectors
//! (devices, files, simulators), durable per-sink caching, and reliable
//! delivery to North connectors (historians, HTTP endpoints, folders).
//!
//! ## Design
//!
//! - **South / North contract**: data sources and sinks plug in through two
//!   small async traits; the engine never knows their internals
//! - **Durable by default**: every value and file is persisted in a
//!   per-North SQLite queue before delivery is even attempted, so nothing
//!   is lost across restarts or sink outages
//! - **Fault isolated**: a broken connector is logged and skipped; its
//!   siblings keep running
//! - **At-least-once delivery**: data leaves a queue only after the North
//!   confirms it
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fluxgate::prelude::*;
//!
//! let config = GatewayConfig::from_file("gateway.toml")?;
//! let mut engine = Engine::new(config);
//! engine.start().await?;
//!
//! tokio::signal::ctrl_c().await?;
//! engine.stop().await;
//! ```
//!
//! ## Built-in Connectors
//!
//! | Side | Type | Purpose |
//! |-------|----------------|----------------------------------------|
//! | South | `simulator` | Generated signals for commissioning |
//! | South | `folder-scanner` | Pick up files dropped in a directory |
//! | North | `console` | Print to stdout |
//! | North | `file-writer` | Write to a local or mounted directory |
//! | North | `http` | POST values and files to an endpoint |

pub mod cache;
pub mod connector;
pub mod core;
pub mod engine;
pub mod scheduler;
pub mod status;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::connector::traits::{
        ConnectionState, DataSink, NorthConnector, SouthConnector,
    };
    pub use crate::connector::ConnectorFactory;
    pub use crate::core::config::GatewayConfig;
    pub use crate::core::data::{DataPayload, DataValue, Quality, Value};
    pub use crate::core::error::{EngineError, Result};
    pub use crate::engine::Engine;
}

// Re-export core types at crate root for convenience
pub use crate::core::config::GatewayConfig;
pub use crate::core::data::{DataPayload, DataValue, Quality, Value};
pub use crate::core::error::{EngineError, Result};
pub use crate::core::metadata::{connector_registry, ConnectorKind, ConnectorMetadata};

// Re-export the runtime entry points
pub use crate::connector::traits::{DataSink, NorthConnector, SouthConnector};
pub use crate::engine::Engine;
pub use crate::status::StatusSnapshot;
