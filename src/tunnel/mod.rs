//! Tunnel engine.
//!
//! # Data Flow
//! ```text
//! Decision + RawRequest
//!     → session.rs (state machine, shared context)
//!     → connect.rs (CONNECT / promoted https: handshake, then relay)
//!     → forward.rs (plain HTTP: one request, one response)
//!     → relay.rs (bidirectional copy with idle deadline)
//!     → TrafficCounters
//! ```

pub mod connect;
pub mod forward;
pub mod relay;
pub mod session;

pub use connect::{open_tunnel, CONNECTION_ESTABLISHED};
pub use forward::forward_http;
pub use relay::{relay, DirectionEnd, EndReason, RelayOutcome};
pub use session::{ConnectionSession, SessionState, TunnelContext, TunnelError};
