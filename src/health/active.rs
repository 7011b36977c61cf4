//! Active upstream health checking and failover.
//!
//! # Responsibilities
//! - Periodically probe the active upstream
//! - On failure, probe the standby and swap the pair if it is healthy
//! - Report each cycle's outcome in logs and metrics

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::health::probe::UpstreamProbe;
use crate::health::state::UpstreamPair;
use crate::observability::metrics;

/// Result of one monitor cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The active upstream passed its probe.
    Healthy,
    /// Active failed, standby passed, and the pair was swapped.
    FailedOver,
    /// Both failed; nothing changed.
    BackupUnhealthy,
    /// Active failed and there is no standby to swap in.
    NoBackup,
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleOutcome::Healthy => "healthy",
            CycleOutcome::FailedOver => "failed-over",
            CycleOutcome::BackupUnhealthy => "backup-unhealthy",
            CycleOutcome::NoBackup => "no-backup",
        };
        f.write_str(name)
    }
}

fn role(is_primary: bool) -> &'static str {
    if is_primary {
        "primary"
    } else {
        "backup"
    }
}

/// Sole writer of the [`UpstreamPair`].
pub struct HealthMonitor<P> {
    probe: P,
    upstreams: Arc<UpstreamPair>,
    interval: Duration,
}

impl<P: UpstreamProbe> HealthMonitor<P> {
    pub fn new(probe: P, upstreams: Arc<UpstreamPair>, interval: Duration) -> Self {
        Self {
            probe,
            upstreams,
            interval,
        }
    }

    /// Probe every interval until `shutdown` fires. The first probe runs one
    /// interval after start.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval = ?self.interval,
            upstream = %self.upstreams.active_address(),
            "Health monitor starting"
        );

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one probe cycle.
    pub async fn check_once(&self) -> CycleOutcome {
        let snapshot = self.upstreams.snapshot();
        let active_role = role(snapshot.active_is_primary);

        match self.probe.probe(&snapshot.active).await {
            Ok(()) => {
                metrics::record_probe(active_role, true);
                tracing::debug!(upstream = %snapshot.active, role = active_role, "Upstream healthy");
                return CycleOutcome::Healthy;
            }
            Err(e) => {
                metrics::record_probe(active_role, false);
                tracing::warn!(upstream = %snapshot.active, role = active_role, error = %e, "Upstream probe failed");
            }
        }

        let Some(standby) = snapshot.standby.as_deref() else {
            tracing::warn!(upstream = %snapshot.active, "No backup upstream configured, keeping active");
            return CycleOutcome::NoBackup;
        };
        let standby_role = role(!snapshot.active_is_primary);

        if let Err(e) = self.probe.probe(standby).await {
            metrics::record_probe(standby_role, false);
            tracing::error!(
                active = %snapshot.active,
                standby = %standby,
                error = %e,
                "Backup upstream also unhealthy, keeping active"
            );
            return CycleOutcome::BackupUnhealthy;
        }
        metrics::record_probe(standby_role, true);

        match self.upstreams.fail_over() {
            Some(current) => {
                metrics::record_failover(current.active_is_primary);
                tracing::warn!(from = %snapshot.active, to = %current.active, "Failed over to backup upstream");
                CycleOutcome::FailedOver
            }
            None => CycleOutcome::NoBackup,
        }
    }
}
