//! Domain pattern matching.
//!
//! # Responsibilities
//! - Parse rule patterns: `*`, `*.suffix`, or an exact host
//! - Match a target host against a pattern
//!
//! # Design Decisions
//! - Host matching is case-insensitive (patterns lower-cased once, at load)
//! - `*.suffix` also covers the bare `suffix`, but only on a label boundary
//! - No regex to guarantee O(n) matching

use std::fmt;

use serde::{Deserialize, Serialize};

/// What to do with traffic for a matched host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMethod {
    /// Connect to the destination ourselves.
    Direct,
    /// Relay through the active upstream proxy.
    Proxy,
    /// Close the client connection without a response.
    Block,
}

impl ForwardMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardMethod::Direct => "direct",
            ForwardMethod::Proxy => "proxy",
            ForwardMethod::Block => "block",
        }
    }
}

impl fmt::Display for ForwardMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled domain pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    /// `*`: every host.
    Any,
    /// `*.suffix`: the suffix itself and any subdomain of it.
    Suffix(String),
    /// Exact host.
    Exact(String),
}

impl DomainPattern {
    /// Compile a pattern string from the rule file.
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern == "*" {
            DomainPattern::Any
        } else if let Some(suffix) = pattern.strip_prefix("*.") {
            DomainPattern::Suffix(suffix.to_string())
        } else {
            DomainPattern::Exact(pattern)
        }
    }

    /// Returns true if `host` (already lower-cased) matches this pattern.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            DomainPattern::Any => true,
            DomainPattern::Suffix(suffix) => {
                host == suffix
                    || host
                        .strip_suffix(suffix.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }
            DomainPattern::Exact(exact) => host == exact,
        }
    }
}

impl fmt::Display for DomainPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainPattern::Any => f.write_str("*"),
            DomainPattern::Suffix(suffix) => write!(f, "*.{}", suffix),
            DomainPattern::Exact(exact) => f.write_str(exact),
        }
    }
}

/// One entry of the ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingRule {
    pub pattern: DomainPattern,
    pub method: ForwardMethod,
}

impl ForwardingRule {
    pub fn new(pattern: &str, method: ForwardMethod) -> Self {
        Self {
            pattern: DomainPattern::parse(pattern),
            method,
        }
    }

    /// Returns true if this rule applies to `host`.
    pub fn matches(&self, host: &str) -> bool {
        self.pattern.matches(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_matcher() {
        let pattern = DomainPattern::parse("*.example.com");
        assert!(pattern.matches("example.com"));
        assert!(pattern.matches("sub.example.com"));
        assert!(pattern.matches("a.b.example.com"));
        assert!(!pattern.matches("notexample.com"));
        assert!(!pattern.matches("example.com.evil"));
    }

    #[test]
    fn test_exact_matcher() {
        let pattern = DomainPattern::parse("Example.COM");
        assert_eq!(pattern, DomainPattern::Exact("example.com".into()));
        assert!(pattern.matches("example.com"));
        assert!(!pattern.matches("www.example.com"));
    }

    #[test]
    fn test_any_matcher() {
        let pattern = DomainPattern::parse("*");
        assert!(pattern.matches("anything.test"));
        assert!(pattern.matches("10.0.0.1"));
        assert_eq!(pattern.to_string(), "*");
    }
}
