//! Proxy server.
//!
//! # Responsibilities
//! - Accept client connections and spawn one task per connection
//! - Run ingestion → dispatch → routing → tunnel for each connection
//! - Log and drop per-connection errors at the task boundary
//! - Stop accepting on shutdown and drain in-flight sessions
//!
//! # Design Decisions
//! - No admission control; every accepted socket is served
//! - Nothing is ever answered on malformed input, the socket is just closed
//! - Rule set and upstream pair are shared by `Arc`, never copied per request

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::schema::{LimitsConfig, ProxyConfig};
use crate::health::state::UpstreamPair;
use crate::http::dispatch::{dispatch, Dispatch, DispatchError};
use crate::http::head::HeadError;
use crate::http::request::{read_request, RequestError};
use crate::net::{ConnectionId, ConnectionTracker, Listener};
use crate::observability::metrics::TrafficCounters;
use crate::routing::Router;
use crate::tunnel::{forward_http, open_tunnel, ConnectionSession, TunnelContext, TunnelError};

/// Everything a connection task needs.
#[derive(Debug)]
pub struct ProxyState {
    pub router: Router,
    pub upstreams: Arc<UpstreamPair>,
    pub tunnel: TunnelContext,
    pub limits: LimitsConfig,
}

/// Why a connection ended without completing its session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("malformed request: {0}")]
    Request(#[from] RequestError),
    #[error("cannot dispatch request: {0}")]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

impl ConnectionError {
    fn log(&self, peer: SocketAddr) {
        match self {
            // Client went away or stayed silent before sending a full request.
            ConnectionError::Request(RequestError::Head(HeadError::Truncated | HeadError::Read(_))) => {
                tracing::debug!(peer_addr = %peer, error = %self, "Connection closed before request")
            }
            ConnectionError::Tunnel(e) if e.is_timeout() => {
                tracing::debug!(peer_addr = %peer, error = %self, "Peer went idle")
            }
            ConnectionError::Request(_) | ConnectionError::Dispatch(_) => {
                tracing::warn!(peer_addr = %peer, error = %self, "Dropping connection")
            }
            ConnectionError::Tunnel(TunnelError::Rejected(_)) => {
                tracing::info!(peer_addr = %peer, error = %self, "Tunnel rejected")
            }
            ConnectionError::Tunnel(_) => tracing::warn!(peer_addr = %peer, error = %self, "Tunnel failed"),
        }
    }
}

/// Forward proxy server.
pub struct ProxyServer {
    state: Arc<ProxyState>,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl ProxyServer {
    pub fn new(
        config: &ProxyConfig,
        router: Router,
        upstreams: Arc<UpstreamPair>,
        counters: Arc<TrafficCounters>,
    ) -> Self {
        let state = ProxyState {
            router,
            upstreams,
            tunnel: TunnelContext::from_config(config, counters),
            limits: config.limits.clone(),
        };
        Self {
            state: Arc::new(state),
            tracker: ConnectionTracker::new(),
            drain_timeout: Duration::from_secs(config.timeouts.drain_secs),
        }
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: impl Into<Listener>, mut shutdown: broadcast::Receiver<()>) {
        let listener = listener.into();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                rules = self.state.router.rules().len(),
                upstream = %self.state.upstreams.active_address(),
                "Proxy server starting"
            );
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        // EMFILE and friends: back off before the next accept.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }
        drop(listener);

        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, timeout = ?self.drain_timeout, "Draining sessions");
        }
        if !self.tracker.wait_for_drain(self.drain_timeout).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain timeout elapsed with sessions still open"
            );
        }
        tracing::info!("Proxy server stopped");
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let guard = self.tracker.track();
        let id = guard.id();
        let state = Arc::clone(&self.state);
        let span = tracing::info_span!("session", connection_id = %id, peer_addr = %peer);

        tokio::spawn(
            async move {
                if let Err(e) = handle_connection(stream, id, &state).await {
                    e.log(peer);
                }
                drop(guard);
            }
            .instrument(span),
        );
    }
}

/// Serve one client connection to completion.
pub async fn handle_connection(stream: TcpStream, id: ConnectionId, state: &ProxyState) -> Result<(), ConnectionError> {
    let mut client = BufReader::new(stream);
    let request = read_request(&mut client, &state.limits, state.tunnel.idle_timeout).await?;
    tracing::debug!(
        method = %request.head.method,
        target = %request.head.target,
        version = %request.head.version,
        "Request received"
    );

    let dispatched = dispatch(&request.head)?;
    let target = dispatched.target().clone();
    let protocol = dispatched.protocol();
    let decision = state.router.route(&target.host, target.port, protocol, &state.upstreams);
    let mut session = ConnectionSession::new(id, target, protocol, &decision);

    match dispatched {
        Dispatch::Tunnel(_) => {
            open_tunnel(&mut session, client, &request, &state.tunnel).await?;
        }
        Dispatch::Forward(forward) => {
            let result = forward_http(&mut session, &mut client, &request, &forward, &state.tunnel).await;
            let _ = client.shutdown().await;
            result?;
        }
    }
    Ok(())
}
