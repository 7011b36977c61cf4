//! Forward proxy library.
//!
//! Accepts client HTTP and CONNECT traffic and, per target host, connects
//! directly, relays through an upstream proxy, or blocks the connection.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod tunnel;

pub use config::schema::ProxyConfig;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
