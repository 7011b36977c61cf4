//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatched request (host, port, protocol)
//!     → router.rs (ordered rule scan, then heuristics)
//!     → matcher.rs (evaluate domain patterns)
//!     → Return: Decision { method, upstream address }
//!
//! Rule Compilation (at startup):
//!     YAML rule entries
//!     → Compile patterns (lower-cased, wildcard split)
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Rules compiled at startup, immutable at runtime
//! - Deterministic: same input always yields the same decision
//! - First match wins, in file order

pub mod matcher;
pub mod router;

pub use matcher::{DomainPattern, ForwardMethod, ForwardingRule};
pub use router::{Decision, MatchReason, Protocol, Router};
