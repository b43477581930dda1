//! Runtime health and throughput reporting.
//!
//! Connectors bump lock-free counters as data moves through the engine;
//! [`StatusSnapshot`] collects them, together with cache depths and process
//! resource usage, into an ordered list of display entries. The engine logs
//! a snapshot on a fixed interval and exposes it on demand.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

// ============================================================
// Counters
// ============================================================

/// Values and files received from one South connector.
#[derive(Debug, Default)]
pub struct SouthCounters {
    pub values_received: AtomicU64,
    pub files_received: AtomicU64,
}

/// Values and files delivered by one North connector. The sent counters are
/// shared with the North's caches, which increment them on confirmed
/// delivery.
#[derive(Debug, Default)]
pub struct NorthCounters {
    pub values_sent: Arc<AtomicU64>,
    pub files_sent: Arc<AtomicU64>,
}

/// Per-connector throughput counters, keyed by connector ID.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    souths: DashMap<String, Arc<SouthCounters>>,
    norths: DashMap<String, Arc<NorthCounters>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn south(&self, id: &str) -> Arc<SouthCounters> {
        self.souths
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(SouthCounters::default()))
            .clone()
    }

    pub fn north(&self, id: &str) -> Arc<NorthCounters> {
        self.norths
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(NorthCounters::default()))
            .clone()
    }
}

// ============================================================
// Snapshot
// ============================================================

/// Ordered key/value status entries, built up by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    entries: Vec<(String, String)>,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        self.entries.push((key.into(), value.to_string()));
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Human-readable uptime like "2d 3h 4m 5s".
pub fn format_uptime(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let total = (now - since).num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

// ============================================================
// Resource sampling
// ============================================================

/// Process resource usage at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    /// Resident set size in bytes, when the platform exposes it.
    pub memory_bytes: Option<u64>,
    /// One-minute system load average, when available.
    pub load_average: Option<f64>,
}

/// Source of process resource usage, swappable in tests.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceUsage;
}

/// Reads `/proc` on Linux; reports nothing elsewhere.
#[derive(Debug, Default)]
pub struct ProcResourceSampler;

impl ResourceSampler for ProcResourceSampler {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> ResourceUsage {
        ResourceUsage {
            memory_bytes: read_rss_bytes(),
            load_average: read_load_average(),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> ResourceUsage {
        ResourceUsage::default()
    }
}

#[cfg(target_os = "linux")]
fn read_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(rss_pages * 4096)
}

#[cfg(target_os = "linux")]
fn read_load_average() -> Option<f64> {
    let loadavg = std::fs::read_to_string("/proc/loadavg").ok()?;
    loadavg.split_whitespace().next()?.parse().ok()
}

/// Megabytes with one decimal, for snapshot display.
pub fn format_memory(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use chrono::TimeZone;

    #[test]
    fn test_counters_shared_across_lookups() {
        let registry = CounterRegistry::new();
        registry.south("s1").values_received.fetch_add(5, Ordering::Relaxed);
        registry.south("s1").values_received.fetch_add(2, Ordering::Relaxed);

        assert_eq!(registry.south("s1").values_received.load(Ordering::Relaxed), 7);
        assert_eq!(registry.south("other").values_received.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_north_sent_counter_is_shared_handle() {
        let registry = CounterRegistry::new();
        let sent = registry.north("n1").values_sent.clone();
        sent.fetch_add(10, Ordering::Relaxed);

        assert_eq!(registry.north("n1").values_sent.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_snapshot_preserves_insertion_order() {
        let mut snapshot = StatusSnapshot::new();
        snapshot.push("uptime", "5s");
        snapshot.push("south.s1.values_received", 42);
        snapshot.push("north.n1.values_sent", 40);

        let keys: Vec<&str> = snapshot.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["uptime", "south.s1.values_received", "north.n1.values_sent"]
        );
        assert_eq!(snapshot.get("north.n1.values_sent"), Some("40"));
        assert_eq!(
            snapshot.to_string(),
            "uptime=5s, south.s1.values_received=42, north.n1.values_sent=40"
        );
    }

    #[test]
    fn test_uptime_formatting() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format_uptime(start, start + chrono::Duration::seconds(5)), "5s");
        assert_eq!(
            format_uptime(start, start + chrono::Duration::seconds(65)),
            "1m 5s"
        );
        assert_eq!(
            format_uptime(start, start + chrono::Duration::seconds(3 * 3600 + 120)),
            "3h 2m 0s"
        );
        assert_eq!(
            format_uptime(start, start + chrono::Duration::days(2) + chrono::Duration::seconds(1)),
            "2d 0h 0m 1s"
        );
    }

    #[test]
    fn test_memory_formatting() {
        assert_eq!(format_memory(50 * 1024 * 1024), "50.0 MB");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_sampler_reports_memory() {
        let usage = ProcResourceSampler.sample();
        assert!(usage.memory_bytes.unwrap_or(0) > 0);
    }
}
