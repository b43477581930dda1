//! Connector contract.
//!
//! Every South and North implementation satisfies one of the two traits
//! below. The engine owns the collection of active instances; connectors own
//! their connection state machine and any internal reconnect strategy.
//!
//! # Contract summary
//!
//! - A South acquires data and hands it to the engine through [`DataSink`];
//!   those calls enqueue into durable caches and never block on delivery.
//! - A North's `handle_values`/`handle_file` are invoked exclusively by that
//!   connector's own cache, never directly by the engine. Returning an error
//!   means the batch is retried or dropped according to `should_retry`, never
//!   silently lost.
//! - init/connect failures of one connector must not prevent others from
//!   starting; the engine logs them and leaves the instance disconnected.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::data::DataValue;
use crate::core::error::{EngineError, Result};

/// Connection state of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected to the target.
    #[default]
    Disconnected,

    /// Attempting to connect.
    Connecting,

    /// Connected and operational.
    Connected,

    /// Connection error state.
    Error,
}

impl ConnectionState {
    /// Check if currently connected.
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Engine-side sink handed to South connectors at init.
///
/// A South signals newly acquired data by calling back into the engine
/// through this trait. Both methods only enqueue into the subscribed North
/// caches; they never wait for delivery to the sinks themselves.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Forward a batch of values originating from `south_id`.
    ///
    /// No-op when `values` is empty. Fan-out failures are logged by the
    /// engine, not surfaced to the caller.
    async fn add_values(&self, south_id: &str, values: Vec<DataValue>);

    /// Forward a file originating from `south_id`.
    ///
    /// Ownership of the bytes transfers to the caches: each subscribed North
    /// copies the file into cache-controlled storage. When
    /// `preserve_original` is false the engine deletes `path` once every
    /// subscribed North has settled, and only then.
    async fn add_file(&self, south_id: &str, path: &Path, preserve_original: bool);
}

/// A pluggable component that acquires data on a schedule or via push.
#[async_trait]
pub trait SouthConnector: Send + Sync {
    /// Prepare internal state and keep the engine sink for later pushes.
    async fn init(&mut self, sink: Arc<dyn DataSink>) -> Result<()>;

    /// Establish the connection to the data source.
    async fn connect(&mut self) -> Result<()>;

    /// Tear down the connection and cancel any internal reconnect timer.
    async fn disconnect(&mut self) -> Result<()>;

    /// Acquire data for one tick of `scan_mode`.
    ///
    /// The scheduler may invoke this again for a *different* mode while a
    /// previous invocation is still running; implementations that cannot
    /// tolerate that must serialize internally. (The engine currently holds
    /// each instance behind a mutex, which serializes all scans, but the
    /// contract does not promise it.)
    async fn on_scan(&mut self, scan_mode: &str) -> Result<()>;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Connected
    }
}

/// A pluggable component that delivers cached data to an external sink.
#[async_trait]
pub trait NorthConnector: Send + Sync {
    /// Prepare internal state (create folders, parse settings, ...).
    async fn init(&mut self) -> Result<()>;

    /// Establish the connection to the sink.
    async fn connect(&mut self) -> Result<()>;

    /// Tear down the connection and cancel any internal reconnect timer.
    async fn disconnect(&mut self) -> Result<()>;

    /// Deliver a batch of values. Invoked only by this connector's cache.
    async fn handle_values(&mut self, values: &[DataValue]) -> Result<()>;

    /// Deliver one file. Invoked only by this connector's cache.
    async fn handle_file(&mut self, path: &Path) -> Result<()>;

    /// Whether this connector accepts value batches.
    fn handles_values(&self) -> bool {
        false
    }

    /// Whether this connector accepts files.
    fn handles_files(&self) -> bool {
        false
    }

    /// Subscription filter: South ids this connector accepts data from.
    /// An empty slice means "all origins".
    fn subscribed_to(&self) -> &[String] {
        &[]
    }

    /// Check whether data originating from `south_id` is accepted.
    fn is_subscribed(&self, south_id: &str) -> bool {
        let filter = self.subscribed_to();
        filter.is_empty() || filter.iter().any(|id| id == south_id)
    }

    /// Classify a delivery failure. Retryable errors keep the batch queued
    /// and reschedule after the retry interval; non-retryable errors drop
    /// the batch after logging.
    fn should_retry(&self, error: &EngineError) -> bool {
        error.is_retryable()
    }

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Connected
    }
}

/// South connector as shared between the engine and the scan scheduler.
pub type SouthHandle = Arc<tokio::sync::Mutex<Box<dyn SouthConnector>>>;

/// North connector as shared between the engine and its caches.
pub type NorthHandle = Arc<tokio::sync::Mutex<Box<dyn NorthConnector>>>;
