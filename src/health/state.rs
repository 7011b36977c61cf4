//! Upstream selection state.
//!
//! # States
//! - Primary active: the configured primary receives proxied traffic
//! - Backup active: the monitor swapped the pair after a failed probe
//!
//! # State Transitions
//! ```text
//! active ↔ standby: active probe failed AND standby probe succeeded
//! ```
//!
//! # Design Decisions
//! - One `ArcSwap` holds the whole pair, so readers never see half a swap
//! - The health monitor is the only writer
//! - Reads are lock-free loads on the connection hot path

use std::sync::Arc;

use arc_swap::ArcSwap;

/// An immutable view of the upstream pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSnapshot {
    /// Address used for proxied traffic.
    pub active: String,
    /// Address swapped in on failover.
    pub standby: Option<String>,
    /// Whether `active` is the originally configured primary.
    pub active_is_primary: bool,
}

/// Primary/backup upstream addresses shared by all sessions.
#[derive(Debug)]
pub struct UpstreamPair {
    state: ArcSwap<UpstreamSnapshot>,
}

impl UpstreamPair {
    pub fn new(primary: String, backup: Option<String>) -> Self {
        Self {
            state: ArcSwap::from_pointee(UpstreamSnapshot {
                active: primary,
                standby: backup,
                active_is_primary: true,
            }),
        }
    }

    /// Current pair.
    pub fn snapshot(&self) -> Arc<UpstreamSnapshot> {
        self.state.load_full()
    }

    /// Address proxied traffic should be sent to right now.
    pub fn active_address(&self) -> String {
        self.state.load().active.clone()
    }

    /// Swap active and standby.
    ///
    /// Returns the new snapshot, or `None` when there is no standby.
    pub fn fail_over(&self) -> Option<Arc<UpstreamSnapshot>> {
        self.state.load().standby.as_ref()?;
        let previous = self.state.rcu(|current| match &current.standby {
            Some(standby) => Arc::new(UpstreamSnapshot {
                active: standby.clone(),
                standby: Some(current.active.clone()),
                active_is_primary: !current.active_is_primary,
            }),
            None => Arc::clone(current),
        });
        tracing::debug!(previous = %previous.active, "Upstream pair swapped");
        Some(self.state.load_full())
    }
}
