//! Per-North durable buffering between data collection and delivery.
//!
//! Every enabled North connector owns one [`ValueCache`] and one
//! [`FileCache`], both backed by SQLite files under the engine cache
//! folder. Data is persisted before it is acknowledged to the producing
//! side, survives restarts, and leaves the queue only after the North
//! confirms delivery.

pub mod database;
pub mod file_cache;
pub mod value_cache;

pub use database::{CachedFile, CachedValue, FileDatabase, RawFileDatabase, ValueDatabase};
pub use file_cache::FileCache;
pub use value_cache::ValueCache;
