//! Per-connection session state.
//!
//! A session moves through
//! `Init → Connecting → (Established | Rejected) → Relaying → Closed`;
//! a blocked session goes straight from `Init` to `Closed`.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::http::dispatch::Target;
use crate::http::head::HeadError;
use crate::http::response::ResponseError;
use crate::net::ConnectionId;
use crate::observability::metrics::TrafficCounters;
use crate::routing::{Decision, ForwardMethod, Protocol};
use crate::tunnel::relay::{DirectionEnd, EndReason};

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to connect to {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write to {peer}: {source}")]
    Write {
        peer: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("upstream refused the tunnel: {0}")]
    Rejected(String),
    #[error("bad response from {address}: {source}")]
    Response {
        address: String,
        #[source]
        source: ResponseError,
    },
    #[error("decision `{0}` carries no upstream address")]
    NoUpstream(ForwardMethod),
}

impl TunnelError {
    /// True when the upstream or origin went silent past the idle timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            TunnelError::Dial { source, .. } => source.kind() == io::ErrorKind::TimedOut,
            TunnelError::Response {
                source: ResponseError::Head(HeadError::Read(e)),
                ..
            } => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Connecting,
    Established,
    Rejected,
    Relaying,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "init",
            SessionState::Connecting => "connecting",
            SessionState::Established => "established",
            SessionState::Rejected => "rejected",
            SessionState::Relaying => "relaying",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared, read-only inputs of the tunnel engine.
#[derive(Debug, Clone)]
pub struct TunnelContext {
    pub counters: Arc<TrafficCounters>,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_header_bytes: usize,
}

impl TunnelContext {
    pub fn from_config(config: &ProxyConfig, counters: Arc<TrafficCounters>) -> Self {
        Self {
            counters,
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            idle_timeout: Duration::from_secs(config.timeouts.idle_secs),
            max_header_bytes: config.limits.max_header_bytes,
        }
    }
}

/// One client connection after its forwarding decision.
#[derive(Debug)]
pub struct ConnectionSession {
    id: ConnectionId,
    target: Target,
    protocol: Protocol,
    method: ForwardMethod,
    upstream: Option<String>,
    state: SessionState,
}

impl ConnectionSession {
    pub fn new(id: ConnectionId, target: Target, protocol: Protocol, decision: &Decision) -> Self {
        Self {
            id,
            target,
            protocol,
            method: decision.method,
            upstream: decision.upstream.clone(),
            state: SessionState::Init,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn method(&self) -> ForwardMethod {
        self.method
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The address to dial.
    pub fn upstream(&self) -> Result<&str, TunnelError> {
        self.upstream.as_deref().ok_or(TunnelError::NoUpstream(self.method))
    }

    pub fn transition(&mut self, next: SessionState) {
        tracing::debug!(
            connection_id = %self.id,
            target = %self.target,
            from = %self.state,
            to = %next,
            "Session state change"
        );
        self.state = next;
    }

    /// Log how a relay direction ended, at a level matching its severity.
    pub fn log_direction(&self, direction: &'static str, end: &DirectionEnd) {
        if end.reason.is_clean() || matches!(end.reason, EndReason::IdleTimeout) {
            tracing::debug!(
                connection_id = %self.id,
                direction,
                bytes = end.bytes,
                reason = %end.reason,
                "Relay direction finished"
            );
        } else {
            tracing::warn!(
                connection_id = %self.id,
                direction,
                bytes = end.bytes,
                reason = %end.reason,
                "Relay direction failed"
            );
        }
    }
}
