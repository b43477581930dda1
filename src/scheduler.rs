//! Cron-driven scan scheduling for South connectors.
//!
//! The engine resolves its South configurations into a [`ScanRoutingTable`]
//! mapping each scan mode to the connectors that must be polled on its
//! cadence, then hands the table to a [`ScanScheduler`] which runs one task
//! per scan mode. Each tick fans out `on_scan` to every routed connector
//! concurrently and waits for all of them before lining up the next cron
//! occurrence, so a slow poll can delay the next tick of its own mode but
//! never overlap it, and never touches the other modes.
//!
//! The reserved `listen` mode is never scheduled; connectors configured
//! with it push data on their own.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::Utc;
use cron::Schedule;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connector::traits::SouthHandle;
use crate::core::config::{ScanModeConfig, SouthConfig, LISTEN_MODE};

/// The souths polled on one scan mode's cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRoute {
    /// Cron expression driving this mode.
    pub cron: String,
    /// IDs of the South connectors to poll, in configuration order.
    pub south_ids: Vec<String>,
}

/// Scan mode to connector routing, resolved once at engine start.
#[derive(Debug, Default)]
pub struct ScanRoutingTable {
    routes: BTreeMap<String, ScanRoute>,
}

impl ScanRoutingTable {
    /// Resolve the routing table from the configured scan modes and
    /// enabled South connectors.
    ///
    /// A South contributes its connector-level mode, or the distinct modes
    /// of its points when it carries per-point configuration. References to
    /// undefined scan modes are logged and skipped rather than failing the
    /// whole table, and `listen` never produces a route.
    pub fn build(scan_modes: &[ScanModeConfig], souths: &[SouthConfig]) -> Self {
        let mut routes: BTreeMap<String, ScanRoute> = scan_modes
            .iter()
            .filter(|mode| mode.scan_mode != LISTEN_MODE)
            .map(|mode| {
                (
                    mode.scan_mode.clone(),
                    ScanRoute {
                        cron: mode.cron.clone(),
                        south_ids: Vec::new(),
                    },
                )
            })
            .collect();

        for south in souths.iter().filter(|s| s.enabled) {
            for mode in south_modes(south) {
                if mode == LISTEN_MODE {
                    continue;
                }
                match routes.get_mut(&mode) {
                    Some(route) => {
                        if !route.south_ids.contains(&south.id) {
                            route.south_ids.push(south.id.clone());
                        }
                    }
                    None => {
                        error!(
                            south_id = %south.id,
                            scan_mode = %mode,
                            "south references an undefined scan mode, skipping"
                        );
                    }
                }
            }
        }

        // Modes no enabled south uses need no task.
        routes.retain(|_, route| !route.south_ids.is_empty());
        Self { routes }
    }

    /// Active routes, ordered by scan mode name.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &ScanRoute)> {
        self.routes.iter().map(|(mode, route)| (mode.as_str(), route))
    }

    /// South IDs routed to `scan_mode`, if any.
    pub fn souths_for(&self, scan_mode: &str) -> Option<&[String]> {
        self.routes.get(scan_mode).map(|r| r.south_ids.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Scan modes a single South participates in. Per-point modes take
/// precedence over the connector-level mode when points are configured.
fn south_modes(south: &SouthConfig) -> Vec<String> {
    let mut modes: Vec<String> = Vec::new();
    if south.points.is_empty() {
        if let Some(mode) = &south.scan_mode {
            modes.push(mode.clone());
        }
    } else {
        for point in &south.points {
            if !modes.contains(&point.scan_mode) {
                modes.push(point.scan_mode.clone());
            }
        }
    }
    modes
}

/// Runs one polling task per active scan mode.
pub struct ScanScheduler {
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ScanScheduler {
    /// Spawn the per-mode tasks. `souths` maps connector IDs to their
    /// running handles; routed IDs with no handle (a connector that failed
    /// to start) are skipped at tick time with a log line.
    pub fn start(table: &ScanRoutingTable, souths: &BTreeMap<String, SouthHandle>) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        for (mode, route) in table.routes() {
            let schedule = match Schedule::from_str(&route.cron) {
                Ok(schedule) => schedule,
                Err(e) => {
                    error!(scan_mode = %mode, cron = %route.cron, error = %e, "invalid cron expression, scan mode disabled");
                    continue;
                }
            };

            let handles: Vec<(String, SouthHandle)> = route
                .south_ids
                .iter()
                .filter_map(|id| match souths.get(id) {
                    Some(handle) => Some((id.clone(), handle.clone())),
                    None => {
                        warn!(south_id = %id, scan_mode = %mode, "south not running, excluded from scan mode");
                        None
                    }
                })
                .collect();
            if handles.is_empty() {
                continue;
            }

            info!(scan_mode = %mode, cron = %route.cron, souths = handles.len(), "scan mode scheduled");
            tasks.push(tokio::spawn(scan_loop(
                mode.to_string(),
                schedule,
                handles,
                cancel.clone(),
            )));
        }

        Self {
            cancel,
            tasks: Mutex::new(tasks),
        }
    }

    /// Stop all scan tasks and wait for any in-flight tick to finish.
    /// Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn scan_loop(
    mode: String,
    schedule: Schedule,
    souths: Vec<(String, SouthHandle)>,
    cancel: CancellationToken,
) {
    loop {
        let next = match schedule.upcoming(Utc).next() {
            Some(next) => next,
            None => {
                warn!(scan_mode = %mode, "cron schedule has no upcoming occurrence, stopping");
                break;
            }
        };
        let wait = (next - Utc::now())
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_millis(0));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        // Fan out to every routed south; failures are contained per
        // connector. The next occurrence is lined up only after all polls
        // settle, so a mode never overlaps itself.
        let ticks = souths.iter().map(|(id, handle)| {
            let mode = mode.clone();
            async move {
                let mut guard = handle.lock().await;
                if let Err(e) = guard.on_scan(&mode).await {
                    warn!(south_id = %id, scan_mode = %mode, error = %e, "scan failed");
                } else {
                    debug!(south_id = %id, scan_mode = %mode, "scan complete");
                }
            }
        });
        join_all(ticks).await;
    }

    debug!(scan_mode = %mode, "scan task stopped");
}
