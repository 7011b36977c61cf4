//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! service config (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! forwarding rules (YAML)
//!     → loader.rs (parse, fail open)
//!     → Vec<ForwardingRule> in file order
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_rules, parse_rules, ConfigError};
pub use schema::{
    HealthCheckConfig, LimitsConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, TimeoutConfig,
    UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
