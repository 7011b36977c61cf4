//! Upstream health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Monitor (active.rs):
//!     Periodic timer
//!     → Probe the active upstream (probe.rs)
//!     → On failure, probe the standby
//!     → Swap state.rs if the standby is healthy
//!
//! State (state.rs):
//!     Primary active ←→ Backup active
//! ```
//!
//! # Design Decisions
//! - The monitor is the only writer of the upstream pair
//! - Probe failures are never fatal; they only gate failover
//! - The probe is a trait so cycles can be driven by scripted probes

pub mod active;
pub mod probe;
pub mod state;

pub use active::{CycleOutcome, HealthMonitor};
pub use probe::{ConnectProbe, ProbeError, UpstreamProbe};
pub use state::{UpstreamPair, UpstreamSnapshot};
