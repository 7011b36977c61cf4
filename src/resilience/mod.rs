//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound dial:
//!     → timeouts.rs (connect deadline)
//!
//! Tunnel reads:
//!     → tunnel::relay (shared idle deadline)
//!     → timeouts::is_closed (peer-went-away vs. real failure)
//! ```
//!
//! # Design Decisions
//! - Every outbound connect has a deadline
//! - Nothing is retried; a failed dial ends the session

pub mod timeouts;

pub use timeouts::{connect, deadline, is_closed};
