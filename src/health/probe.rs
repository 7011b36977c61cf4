//! Upstream probing.
//!
//! # Responsibilities
//! - Check that an upstream proxy can carry a real HTTPS exchange
//!
//! # Probe chain
//! ```text
//! TCP connect → CONNECT probe_host:probe_port → 200
//!     → TLS handshake (webpki roots, SNI = probe_host)
//!     → HEAD / → readable status line
//! ```
//! The whole chain shares one deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{InvalidDnsNameError, ServerName};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::schema::HealthCheckConfig;
use crate::http::response::{read_response_head, ResponseError};
use crate::net::join_host_port;

const MAX_PROBE_HEAD_BYTES: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("unreadable response: {0}")]
    Response(#[from] ResponseError),
    #[error("upstream answered CONNECT with `{0}`")]
    Status(String),
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] std::io::Error),
    #[error("invalid probe host: {0}")]
    ServerName(#[from] InvalidDnsNameError),
    #[error("TLS configuration: {0}")]
    TlsConfig(#[from] rustls::Error),
    #[error("probe did not finish within {0:?}")]
    TimedOut(Duration),
}

/// A health check against one upstream address.
pub trait UpstreamProbe: Send + Sync {
    fn probe(&self, upstream: &str) -> impl Future<Output = Result<(), ProbeError>> + Send;
}

impl<P: UpstreamProbe> UpstreamProbe for Arc<P> {
    fn probe(&self, upstream: &str) -> impl Future<Output = Result<(), ProbeError>> + Send {
        (**self).probe(upstream)
    }
}

/// CONNECT + TLS + HEAD probe.
#[derive(Clone)]
pub struct ConnectProbe {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    timeout: Duration,
}

impl ConnectProbe {
    pub fn new(config: &HealthCheckConfig) -> Result<Self, ProbeError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls = rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self {
            host: config.probe_host.clone(),
            port: config.probe_port,
            server_name: ServerName::try_from(config.probe_host.clone())?,
            connector: TlsConnector::from(Arc::new(tls)),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn chain(&self, upstream: &str) -> Result<(), ProbeError> {
        let stream = TcpStream::connect(upstream).await.map_err(ProbeError::Connect)?;
        let mut stream = BufReader::new(stream);

        let authority = join_host_port(&self.host, self.port);
        let connect = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", authority);
        stream.write_all(connect.as_bytes()).await.map_err(ProbeError::Write)?;

        // Bounded by the probe deadline.
        let (_, head) = read_response_head(&mut stream, MAX_PROBE_HEAD_BYTES, None).await?;
        if head.status != 200 {
            return Err(ProbeError::Status(head.status_line()));
        }

        let tls = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(ProbeError::Tls)?;
        let mut tls = BufReader::new(tls);

        let head_request = format!(
            "HEAD / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.host
        );
        tls.write_all(head_request.as_bytes()).await.map_err(ProbeError::Write)?;
        let (_, head) = read_response_head(&mut tls, MAX_PROBE_HEAD_BYTES, None).await?;
        tracing::trace!(upstream, status = head.status, "Probe origin answered");
        Ok(())
    }
}

impl UpstreamProbe for ConnectProbe {
    async fn probe(&self, upstream: &str) -> Result<(), ProbeError> {
        match tokio::time::timeout(self.timeout, self.chain(upstream)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::TimedOut(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn probe(timeout_secs: u64) -> ConnectProbe {
        ConnectProbe::new(&HealthCheckConfig {
            timeout_secs,
            probe_host: "probe.example.com".into(),
            ..HealthCheckConfig::default()
        })
        .unwrap()
    }

    /// Proxy that reads one request head and writes `reply`.
    async fn fake_upstream(reply: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let head = crate::http::head::read_head(&mut stream, 4096).await.unwrap();
            assert!(head.starts_with(b"CONNECT probe.example.com:443 HTTP/1.1\r\n"));
            stream.write_all(reply).await.unwrap();
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
        });
        address
    }

    #[tokio::test]
    async fn refused_connect_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(probe(2).probe(&address).await, Err(ProbeError::Connect(_))));
    }

    #[tokio::test]
    async fn non_200_connect_fails() {
        let address = fake_upstream(b"HTTP/1.1 403 Forbidden\r\n\r\n").await;
        let err = probe(2).probe(&address).await.unwrap_err();
        assert!(matches!(err, ProbeError::Status(ref line) if line.contains("403")));
    }

    #[tokio::test]
    async fn tunnel_without_tls_fails_handshake() {
        let address = fake_upstream(b"HTTP/1.1 200 Connection established\r\n\r\nnot a tls record").await;
        let err = probe(2).probe(&address).await.unwrap_err();
        assert!(matches!(err, ProbeError::Tls(_)));
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let err = probe(1).probe(&address).await.unwrap_err();
        assert!(matches!(err, ProbeError::TimedOut(_)));
    }

    #[test]
    fn rejects_invalid_probe_host() {
        let result = ConnectProbe::new(&HealthCheckConfig {
            probe_host: "not a host".into(),
            ..HealthCheckConfig::default()
        });
        assert!(matches!(result, Err(ProbeError::ServerName(_))));
    }
}
