//! Forward proxy binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                    FORWARD PROXY                      │
//!                      │                                                       │
//!   Client             │  ┌─────────┐   ┌─────────┐   ┌──────────┐            │
//!   ───────────────────┼─▶│   net   │──▶│  http   │──▶│ routing  │            │
//!                      │  │listener │   │ ingest  │   │  rules   │            │
//!                      │  └─────────┘   │ dispatch│   └────┬─────┘            │
//!                      │                └─────────┘        │                  │
//!                      │                                   ▼                  │
//!                      │                            ┌──────────────┐          │
//!   ◀──────────────────┼────────────────────────────│    tunnel    │──────────┼──▶ Target / Upstream
//!                      │                            │ relay+counters│         │
//!                      │                            └──────────────┘          │
//!                      │  ┌────────────────┐  swaps  ┌──────────────┐         │
//!                      │  │ health monitor │────────▶│ UpstreamPair │         │
//!                      │  └────────────────┘         └──────────────┘         │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use forward_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use forward_proxy::health::{ConnectProbe, HealthMonitor};
use forward_proxy::lifecycle::{build_router, build_upstreams, spawn_signal_handler, Shutdown};
use forward_proxy::net::Listener;
use forward_proxy::observability::{logging, metrics};
use forward_proxy::ProxyServer;

#[derive(Parser, Debug)]
#[command(name = "forward-proxy")]
#[command(about = "Rule-based forward proxy with upstream failover", long_about = None)]
struct Args {
    /// Service configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8080.
    #[arg(short, long)]
    listen: Option<String>,

    /// Primary upstream proxy (host:port).
    #[arg(short, long)]
    proxy: Option<String>,

    /// Backup upstream proxy (host:port).
    #[arg(long)]
    proxy_backup: Option<String>,

    /// Forwarding rule file (YAML).
    #[arg(short, long)]
    rules: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listener.bind_address = listen;
        }
        if let Some(proxy) = self.proxy {
            config.upstream.primary = proxy;
        }
        if let Some(backup) = self.proxy_backup {
            config.upstream.backup = Some(backup);
        }
        if let Some(rules) = self.rules {
            config.rules_path = Some(rules);
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;

    logging::init_logging(&config.observability);
    tracing::info!("forward-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        primary = %config.upstream.primary,
        backup = config.upstream.backup.as_deref().unwrap_or("-"),
        health_check = config.health_check.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Checked by validation.
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let upstreams = build_upstreams(&config.upstream).await;
    metrics::set_active_primary(true);
    let router = build_router(&config);
    let counters = std::sync::Arc::new(metrics::TrafficCounters::new());

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let monitor = if config.health_check.enabled {
        let probe = ConnectProbe::new(&config.health_check)?;
        let monitor = HealthMonitor::new(
            probe,
            upstreams.clone(),
            Duration::from_secs(config.health_check.interval_secs),
        );
        Some(tokio::spawn(monitor.run(shutdown.subscribe())))
    } else {
        tracing::info!("Upstream health checks disabled");
        None
    };

    let listener = Listener::bind(&config.listener.bind_address).await?;
    let server = ProxyServer::new(&config, router, upstreams, counters.clone());
    server.run(listener, shutdown.subscribe()).await;

    if let Some(monitor) = monitor {
        let _ = monitor.await;
    }

    let traffic = counters.snapshot();
    tracing::info!(
        proxy_upload = traffic.proxy_upload,
        proxy_download = traffic.proxy_download,
        direct_upload = traffic.direct_upload,
        direct_download = traffic.direct_download,
        "Shutdown complete"
    );
    Ok(())
}
