//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve upstream addresses once
//! - Load the forwarding rules
//! - Build the shared state handed to the server and the monitor
//!
//! # Design Decisions
//! - Fail fast on configuration errors (done by the loader)
//! - Upstream names are resolved once; afterwards addresses are opaque
//! - An unresolvable upstream is kept as configured, with a warning

use std::sync::Arc;

use tokio::net::lookup_host;

use crate::config::loader::load_rules;
use crate::config::schema::{ProxyConfig, UpstreamConfig};
use crate::health::state::UpstreamPair;
use crate::routing::Router;

/// Resolve `host:port` to its first socket address.
///
/// Literal addresses pass through unchanged. On failure the input is
/// returned as is.
pub async fn resolve_address(address: &str) -> String {
    match lookup_host(address).await {
        Ok(mut addrs) => match addrs.next() {
            Some(resolved) => {
                let resolved = resolved.to_string();
                if resolved != address {
                    tracing::info!(address, resolved = %resolved, "Upstream resolved");
                }
                resolved
            }
            None => {
                tracing::warn!(address, "Upstream resolved to no addresses, keeping as configured");
                address.to_string()
            }
        },
        Err(e) => {
            tracing::warn!(address, error = %e, "Failed to resolve upstream, keeping as configured");
            address.to_string()
        }
    }
}

/// Resolve both upstreams and build the shared pair.
pub async fn build_upstreams(config: &UpstreamConfig) -> Arc<UpstreamPair> {
    let primary = resolve_address(&config.primary).await;
    let backup = match &config.backup {
        Some(backup) => Some(resolve_address(backup).await),
        None => None,
    };
    tracing::info!(primary = %primary, backup = backup.as_deref().unwrap_or("-"), "Upstreams configured");
    Arc::new(UpstreamPair::new(primary, backup))
}

/// Load the rule file named by the config into a router.
pub fn build_router(config: &ProxyConfig) -> Router {
    Router::new(load_rules(config.rules_path.as_deref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_addresses_pass_through() {
        assert_eq!(resolve_address("10.1.2.3:8079").await, "10.1.2.3:8079");
        assert_eq!(resolve_address("[::1]:8079").await, "[::1]:8079");
    }

    #[tokio::test]
    async fn names_resolve_to_socket_addresses() {
        let resolved = resolve_address("localhost:8079").await;
        assert!(resolved.ends_with(":8079"));
        assert!(resolved.parse::<std::net::SocketAddr>().is_ok());
    }

    #[tokio::test]
    async fn unresolvable_is_kept() {
        assert_eq!(resolve_address("no-port-here").await, "no-port-here");
    }

    #[tokio::test]
    async fn pair_without_backup() {
        let pair = build_upstreams(&UpstreamConfig {
            primary: "127.0.0.1:1".into(),
            backup: None,
        })
        .await;
        let snapshot = pair.snapshot();
        assert_eq!(snapshot.active, "127.0.0.1:1");
        assert!(snapshot.standby.is_none());
    }

    #[test]
    fn router_without_rule_file_is_empty() {
        assert!(build_router(&ProxyConfig::default()).rules().is_empty());
    }
}
