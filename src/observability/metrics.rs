//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, traffic, upstream health)
//! - Keep the four traffic counters readable in-process
//! - Install the Prometheus-compatible scrape endpoint (binary only)
//!
//! # Metrics
//! - `proxy_requests_total` (counter): decisions by protocol, host, method
//! - `http_{proxy,direct}_{upload,download}_bytes_total` (counter): relayed bytes
//! - `proxy_active_connections` (gauge): current session count
//! - `proxy_upstream_probe_total` (counter): probe results by role and result
//! - `proxy_upstream_failover_total` (counter): completed swaps
//! - `proxy_upstream_active_primary` (gauge): 1=primary active, 0=backup active
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Counters only ever increase; nothing here resets them

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::routing::ForwardMethod;

pub const PROXY_UPLOAD_BYTES: &str = "http_proxy_upload_bytes_total";
pub const PROXY_DOWNLOAD_BYTES: &str = "http_proxy_download_bytes_total";
pub const DIRECT_UPLOAD_BYTES: &str = "http_direct_upload_bytes_total";
pub const DIRECT_DOWNLOAD_BYTES: &str = "http_direct_download_bytes_total";

/// Direction of relayed bytes, seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → destination.
    Upload,
    /// Destination → client.
    Download,
}

/// Process-wide byte counters split by forwarding method and direction.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    proxy_upload: AtomicU64,
    proxy_download: AtomicU64,
    direct_upload: AtomicU64,
    direct_download: AtomicU64,
}

/// Point-in-time copy of [`TrafficCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub proxy_upload: u64,
    pub proxy_download: u64,
    pub direct_upload: u64,
    pub direct_download: u64,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account `bytes` relayed for a session using `method`.
    ///
    /// Blocked sessions never relay anything and are ignored.
    pub fn record(&self, method: ForwardMethod, direction: Direction, bytes: u64) {
        let (counter, name) = match (method, direction) {
            (ForwardMethod::Proxy, Direction::Upload) => (&self.proxy_upload, PROXY_UPLOAD_BYTES),
            (ForwardMethod::Proxy, Direction::Download) => (&self.proxy_download, PROXY_DOWNLOAD_BYTES),
            (ForwardMethod::Direct, Direction::Upload) => (&self.direct_upload, DIRECT_UPLOAD_BYTES),
            (ForwardMethod::Direct, Direction::Download) => (&self.direct_download, DIRECT_DOWNLOAD_BYTES),
            (ForwardMethod::Block, _) => return,
        };
        counter.fetch_add(bytes, Ordering::Relaxed);
        metrics::counter!(name).increment(bytes);
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            proxy_upload: self.proxy_upload.load(Ordering::Relaxed),
            proxy_download: self.proxy_download.load(Ordering::Relaxed),
            direct_upload: self.direct_upload.load(Ordering::Relaxed),
            direct_download: self.direct_download.load(Ordering::Relaxed),
        }
    }
}

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Count one forwarding decision.
pub fn record_request(protocol: &'static str, host: &str, method: &'static str) {
    metrics::counter!(
        "proxy_requests_total",
        "protocol" => protocol,
        "host" => host.to_string(),
        "method" => method
    )
    .increment(1);
}

/// Track the number of live sessions.
pub fn set_active_connections(count: u64) {
    metrics::gauge!("proxy_active_connections").set(count as f64);
}

/// Count one health probe.
pub fn record_probe(role: &'static str, healthy: bool) {
    let result = if healthy { "ok" } else { "fail" };
    metrics::counter!("proxy_upstream_probe_total", "role" => role, "result" => result).increment(1);
}

/// Count a completed failover and publish which side is active.
pub fn record_failover(active_is_primary: bool) {
    metrics::counter!("proxy_upstream_failover_total").increment(1);
    set_active_primary(active_is_primary);
}

pub fn set_active_primary(active_is_primary: bool) {
    metrics::gauge!("proxy_upstream_active_primary").set(if active_is_primary { 1.0 } else { 0.0 });
}
