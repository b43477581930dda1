//! Core abstractions for the gateway engine.
//!
//! This module provides the data model, configuration and error types shared
//! by the engine, the scheduler, the cache subsystem and all connectors.

pub mod config;
pub mod data;
pub mod error;
pub mod metadata;

pub use config::*;
pub use data::*;
pub use error::{EngineError, Result};
