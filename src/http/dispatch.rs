//! Protocol dispatch.
//!
//! Turns a parsed request head into either a tunnel to `host:port` or a single
//! plain-HTTP exchange with an origin.
//!
//! - `CONNECT host:port` and absolute `https://` URLs become tunnels
//! - Absolute `http://` URLs and origin-form targets with a `Host` header are
//!   forwarded as plain HTTP

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::http::request::RequestHead;
use crate::routing::Protocol;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid authority `{0}`")]
    InvalidAuthority(String),
    #[error("request has neither an absolute URL nor a Host header")]
    MissingHost,
    #[error("unsupported scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("invalid URL `{0}`")]
    InvalidUrl(String),
}

/// Destination of a session. IPv6 hosts are stored without brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    /// Parse `host:port`, `host` or `[v6]:port`, using `default_port` when the
    /// port is absent.
    pub fn parse_authority(authority: &str, default_port: u16) -> Result<Self, DispatchError> {
        let invalid = || DispatchError::InvalidAuthority(authority.to_string());

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match after {
                "" => None,
                _ => Some(after.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else {
            match authority.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() || (!authority.starts_with('[') && host.contains(':')) {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => default_port,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// `host:port` form for dialing, with IPv6 hosts bracketed.
    pub fn address(&self) -> String {
        crate::net::join_host_port(&self.host, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// A plain-HTTP request to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpForward {
    pub target: Target,
    /// Origin-form path and query, always starting with `/`.
    pub path: String,
}

impl HttpForward {
    /// Authority as written in a `Host` header; the default port is omitted.
    pub fn host_header(&self) -> String {
        match (self.target.port, self.target.host.contains(':')) {
            (80, true) => format!("[{}]", self.target.host),
            (80, false) => self.target.host.clone(),
            _ => self.target.address(),
        }
    }

    /// Absolute-form URL, as sent to an upstream proxy.
    pub fn absolute_url(&self) -> String {
        format!("http://{}{}", self.host_header(), self.path)
    }
}

/// What to do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Tunnel(Target),
    Forward(HttpForward),
}

impl Dispatch {
    pub fn protocol(&self) -> Protocol {
        match self {
            Dispatch::Tunnel(_) => Protocol::Https,
            Dispatch::Forward(_) => Protocol::Http,
        }
    }

    pub fn target(&self) -> &Target {
        match self {
            Dispatch::Tunnel(target) => target,
            Dispatch::Forward(forward) => &forward.target,
        }
    }
}

/// Classify a request.
pub fn dispatch(head: &RequestHead) -> Result<Dispatch, DispatchError> {
    if head.is_connect() {
        return Target::parse_authority(&head.target, 443).map(Dispatch::Tunnel);
    }

    if head.target.starts_with('/') {
        let host = head.header("host").ok_or(DispatchError::MissingHost)?;
        let target = Target::parse_authority(host, 80)?;
        return Ok(Dispatch::Forward(HttpForward {
            target,
            path: head.target.clone(),
        }));
    }

    let url = Url::parse(&head.target).map_err(|_| DispatchError::InvalidUrl(head.target.clone()))?;
    let host = url
        .host_str()
        .ok_or_else(|| DispatchError::InvalidUrl(head.target.clone()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

    match url.scheme() {
        "https" => Ok(Dispatch::Tunnel(Target {
            host,
            port: url.port().unwrap_or(443),
        })),
        "http" => {
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            Ok(Dispatch::Forward(HttpForward {
                target: Target {
                    host,
                    port: url.port().unwrap_or(80),
                },
                path,
            }))
        }
        other => Err(DispatchError::UnsupportedScheme(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(request_line: &str, host: Option<&str>) -> RequestHead {
        let mut text = format!("{}\r\n", request_line);
        if let Some(host) = host {
            text.push_str(&format!("Host: {}\r\n", host));
        }
        text.push_str("\r\n");
        RequestHead::parse(&text).unwrap()
    }

    fn target(host: &str, port: u16) -> Target {
        Target {
            host: host.to_string(),
            port,
        }
    }

    #[test]
    fn authority_forms() {
        assert_eq!(Target::parse_authority("example.com:443", 443).unwrap(), target("example.com", 443));
        assert_eq!(Target::parse_authority("example.com", 8443).unwrap(), target("example.com", 8443));
        assert_eq!(Target::parse_authority("[::1]:8443", 443).unwrap(), target("::1", 8443));
        assert_eq!(Target::parse_authority("[::1]", 443).unwrap(), target("::1", 443));

        for bad in ["", ":443", "a.com:99999", "a.com:x", "::1:443", "[::1", "[::1]x"] {
            assert!(Target::parse_authority(bad, 443).is_err(), "{} should fail", bad);
        }
    }

    #[test]
    fn ipv6_address_is_bracketed() {
        assert_eq!(target("::1", 443).address(), "[::1]:443");
        assert_eq!(target("a.com", 80).to_string(), "a.com:80");
    }

    #[test]
    fn connect_is_a_tunnel() {
        let d = dispatch(&head("CONNECT example.com:443 HTTP/1.1", None)).unwrap();
        assert_eq!(d, Dispatch::Tunnel(target("example.com", 443)));
        assert_eq!(d.protocol(), Protocol::Https);
    }

    #[test]
    fn https_url_is_a_tunnel() {
        let d = dispatch(&head("GET https://secure.example.com/x HTTP/1.1", None)).unwrap();
        assert_eq!(d, Dispatch::Tunnel(target("secure.example.com", 443)));
    }

    #[test]
    fn http_url_is_forwarded() {
        let d = dispatch(&head("GET http://a.com:8080/p?q=1 HTTP/1.1", Some("a.com:8080"))).unwrap();
        let Dispatch::Forward(forward) = d else {
            panic!("expected forward");
        };
        assert_eq!(forward.target, target("a.com", 8080));
        assert_eq!(forward.path, "/p?q=1");
        assert_eq!(forward.absolute_url(), "http://a.com:8080/p?q=1");
    }

    #[test]
    fn http_url_defaults() {
        let d = dispatch(&head("GET http://A.com HTTP/1.1", None)).unwrap();
        let Dispatch::Forward(forward) = d else {
            panic!("expected forward");
        };
        assert_eq!(forward.target, target("a.com", 80));
        assert_eq!(forward.path, "/");
        assert_eq!(forward.absolute_url(), "http://a.com/");
    }

    #[test]
    fn origin_form_uses_host_header() {
        let d = dispatch(&head("GET /index.html HTTP/1.1", Some("a.com"))).unwrap();
        assert_eq!(d.target(), &target("a.com", 80));
        assert_eq!(
            dispatch(&head("GET / HTTP/1.1", None)).unwrap_err(),
            DispatchError::MissingHost
        );
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert_eq!(
            dispatch(&head("GET ftp://a.com/ HTTP/1.1", None)).unwrap_err(),
            DispatchError::UnsupportedScheme("ftp".into())
        );
        assert!(matches!(
            dispatch(&head("GET not-a-url HTTP/1.1", None)).unwrap_err(),
            DispatchError::InvalidUrl(_)
        ));
    }

    #[test]
    fn plain_http_under_suffix_rule_dials_port_80_directly() {
        use crate::health::UpstreamPair;
        use crate::routing::{ForwardMethod, ForwardingRule, Router};

        let router = Router::new(vec![ForwardingRule::new("*.cn", ForwardMethod::Direct)]);
        let upstreams = UpstreamPair::new("10.9.9.9:8079".into(), None);

        let d = dispatch(&head("GET http://xyz.cn/ HTTP/1.1", Some("xyz.cn"))).unwrap();
        let Dispatch::Forward(forward) = &d else {
            panic!("expected a forward, got {:?}", d);
        };
        assert_eq!(forward.path, "/");

        let decision = router.route(&d.target().host, d.target().port, d.protocol(), &upstreams);
        assert_eq!(decision.method, ForwardMethod::Direct);
        assert_eq!(decision.upstream.as_deref(), Some("xyz.cn:80"));
    }
}
