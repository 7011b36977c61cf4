//! Forwarding decisions.
//!
//! # Responsibilities
//! - Store the ordered rule list
//! - Decide direct / proxy / block for a (host, port, protocol)
//! - Fall back to address heuristics when no rule matches
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - First match wins, in file order; never "most specific wins"
//! - Always returns a decision, there is no error path

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use crate::health::state::UpstreamPair;
use crate::net::join_host_port;
use crate::observability::metrics;
use crate::routing::matcher::{ForwardMethod, ForwardingRule};

/// Resolvers that must always go through the upstream.
const FORCED_PROXY_IPS: [Ipv4Addr; 2] = [Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)];

/// Client-facing protocol of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a decision was taken. Logged with every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    /// Index into the rule list.
    Rule(usize),
    PrivateNetwork,
    ForcedProxyIp,
    IpLiteral,
    Default,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::Rule(index) => write!(f, "rule[{}]", index),
            MatchReason::PrivateNetwork => f.write_str("private-network"),
            MatchReason::ForcedProxyIp => f.write_str("forced-proxy-ip"),
            MatchReason::IpLiteral => f.write_str("ip-literal"),
            MatchReason::Default => f.write_str("default"),
        }
    }
}

/// The outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub method: ForwardMethod,
    /// `host:port` to dial. `None` for block.
    pub upstream: Option<String>,
    pub reason: MatchReason,
}

/// Ordered, immutable rule set plus the fallback heuristics.
#[derive(Debug, Clone, Default)]
pub struct Router {
    rules: Vec<ForwardingRule>,
}

impl Router {
    pub fn new(rules: Vec<ForwardingRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ForwardingRule] {
        &self.rules
    }

    /// Decide how to forward traffic for `host:port`.
    ///
    /// The proxy address is read from `upstreams` at call time, so a failover
    /// applies to every decision taken after the swap.
    pub fn route(&self, host: &str, port: u16, protocol: Protocol, upstreams: &UpstreamPair) -> Decision {
        let (method, reason) = self.classify(host);
        let upstream = match method {
            ForwardMethod::Direct => Some(join_host_port(host, port)),
            ForwardMethod::Proxy => Some(upstreams.active_address()),
            ForwardMethod::Block => None,
        };

        tracing::info!(
            protocol = %protocol,
            host = %host,
            port,
            method = %method,
            upstream = upstream.as_deref().unwrap_or("-"),
            reason = %reason,
            "Forwarding decision"
        );
        metrics::record_request(protocol.as_str(), host, method.as_str());

        Decision {
            method,
            upstream,
            reason,
        }
    }

    /// Pick the method for a host, without side effects.
    pub fn classify(&self, host: &str) -> (ForwardMethod, MatchReason) {
        let host = host.to_ascii_lowercase();

        if let Some((index, rule)) = self.rules.iter().enumerate().find(|(_, r)| r.matches(&host)) {
            return (rule.method, MatchReason::Rule(index));
        }

        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) if ip.is_private() => (ForwardMethod::Direct, MatchReason::PrivateNetwork),
            Ok(IpAddr::V4(ip)) if FORCED_PROXY_IPS.contains(&ip) => {
                (ForwardMethod::Proxy, MatchReason::ForcedProxyIp)
            }
            Ok(_) => (ForwardMethod::Direct, MatchReason::IpLiteral),
            Err(_) => (ForwardMethod::Proxy, MatchReason::Default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstreams() -> UpstreamPair {
        UpstreamPair::new("10.9.9.9:8079".into(), Some("10.9.9.8:8079".into()))
    }

    #[test]
    fn empty_rule_set_uses_heuristics() {
        let router = Router::default();
        for host in ["10.1.2.3", "192.168.0.1", "172.20.5.5", "203.0.113.5", "::1"] {
            assert_eq!(router.classify(host).0, ForwardMethod::Direct, "{}", host);
        }
        for host in ["1.1.1.1", "8.8.8.8", "example.com"] {
            assert_eq!(router.classify(host).0, ForwardMethod::Proxy, "{}", host);
        }
    }

    #[test]
    fn private_range_edges() {
        let router = Router::default();
        assert_eq!(router.classify("172.16.0.1").1, MatchReason::PrivateNetwork);
        assert_eq!(router.classify("172.31.255.255").1, MatchReason::PrivateNetwork);
        assert_eq!(router.classify("172.32.0.1").1, MatchReason::IpLiteral);
        assert_eq!(router.classify("11.0.0.1").1, MatchReason::IpLiteral);
    }

    #[test]
    fn first_match_wins() {
        let router = Router::new(vec![
            ForwardingRule::new("*.a.com", ForwardMethod::Block),
            ForwardingRule::new("x.a.com", ForwardMethod::Proxy),
        ]);
        let decision = router.route("x.a.com", 443, Protocol::Https, &upstreams());
        assert_eq!(decision.method, ForwardMethod::Block);
        assert_eq!(decision.upstream, None);
        assert_eq!(decision.reason, MatchReason::Rule(0));
    }

    #[test]
    fn rules_take_precedence_over_heuristics() {
        let router = Router::new(vec![
            ForwardingRule::new("192.168.1.1", ForwardMethod::Proxy),
            ForwardingRule::new("8.8.8.8", ForwardMethod::Direct),
        ]);
        assert_eq!(router.classify("192.168.1.1").0, ForwardMethod::Proxy);
        assert_eq!(router.classify("8.8.8.8").0, ForwardMethod::Direct);
    }

    #[test]
    fn global_wildcard_overrides_everything() {
        let router = Router::new(vec![ForwardingRule::new("*", ForwardMethod::Direct)]);
        let decision = router.route("example.com", 443, Protocol::Https, &upstreams());
        assert_eq!(decision.method, ForwardMethod::Direct);
        assert_eq!(decision.upstream.as_deref(), Some("example.com:443"));
    }

    #[test]
    fn addresses_follow_the_method() {
        let router = Router::new(vec![
            ForwardingRule::new("*.cn", ForwardMethod::Direct),
            ForwardingRule::new("ads.example.com", ForwardMethod::Block),
        ]);
        let pair = upstreams();

        let direct = router.route("xyz.cn", 80, Protocol::Http, &pair);
        assert_eq!(direct.upstream.as_deref(), Some("xyz.cn:80"));

        let proxied = router.route("example.com", 443, Protocol::Https, &pair);
        assert_eq!(proxied.method, ForwardMethod::Proxy);
        assert_eq!(proxied.upstream.as_deref(), Some("10.9.9.9:8079"));

        let v6 = router.route("2001:db8::1", 443, Protocol::Https, &pair);
        assert_eq!(v6.upstream.as_deref(), Some("[2001:db8::1]:443"));
    }

    #[test]
    fn proxy_address_tracks_failover() {
        let router = Router::default();
        let pair = upstreams();
        pair.fail_over();
        let decision = router.route("example.com", 443, Protocol::Https, &pair);
        assert_eq!(decision.upstream.as_deref(), Some("10.9.9.8:8079"));
    }

    #[test]
    fn host_comparison_ignores_case() {
        let router = Router::new(vec![ForwardingRule::new("*.Blocked.com", ForwardMethod::Block)]);
        assert_eq!(router.classify("ADS.blocked.COM").0, ForwardMethod::Block);
    }
}
