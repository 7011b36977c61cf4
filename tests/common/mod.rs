//! Shared utilities for integration tests.
//!
//! Every server binds `127.0.0.1:0`, so tests can run in parallel.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use forward_proxy::config::ProxyConfig;
use forward_proxy::health::UpstreamPair;
use forward_proxy::http::head::read_head;
use forward_proxy::lifecycle::Shutdown;
use forward_proxy::net::Listener;
use forward_proxy::observability::metrics::{TrafficCounters, TrafficSnapshot};
use forward_proxy::routing::{ForwardMethod, ForwardingRule, Router};
use forward_proxy::ProxyServer;

/// Upstream proxy double: records each request head, answers with a fixed
/// status line and echoes the tunnel if the status was 200.
pub struct MockUpstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub async fn start(status_line: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let (seen, count) = (Arc::clone(&requests), Arc::clone(&connections));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let mut stream = BufReader::new(stream);
                    let Ok(head) = read_head(&mut stream, 64 * 1024).await else {
                        return;
                    };
                    seen.lock().unwrap().push(String::from_utf8_lossy(&head).into_owned());

                    let reply = format!("{}\r\n\r\n", status_line);
                    if stream.write_all(reply.as_bytes()).await.is_err() {
                        return;
                    }
                    if status_line.contains(" 200 ") || status_line.ends_with(" 200") {
                        echo(stream).await;
                    }
                });
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn echo<S>(mut stream: S)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = stream.shutdown().await;
}

/// Plain TCP echo server, used as a direct tunnel target.
pub async fn start_echo_server() -> SocketAddr {
    start_echo_server_on("127.0.0.1:0").await.unwrap()
}

/// Echo server on `bind`, or `None` if the address cannot be bound
/// (e.g. no IPv6 loopback on this host).
pub async fn start_echo_server_on(bind: &str) -> Option<SocketAddr> {
    let listener = TcpListener::bind(bind).await.ok()?;
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(echo(stream));
        }
    });
    Some(addr)
}

/// Accepts connections and reads them, but never writes a byte.
/// Counts accepted connections.
pub async fn start_silent_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&connections);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            count.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut sink = Vec::new();
                let _ = stream.read_to_end(&mut sink).await;
            });
        }
    });
    (addr, connections)
}

/// HTTP origin: captures each request head, answers with `body`.
pub async fn start_origin(body: &'static str) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let mut stream = BufReader::new(stream);
                let Ok(head) = read_head(&mut stream, 64 * 1024).await else {
                    return;
                };
                seen.lock().unwrap().push(String::from_utf8_lossy(&head).into_owned());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, requests)
}

/// Address nothing listens on.
pub async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// A proxy running on an ephemeral port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub counters: Arc<TrafficCounters>,
    pub upstreams: Arc<UpstreamPair>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl RunningProxy {
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }

    /// Wait until `check` holds for the counters, or panic after 2s.
    pub async fn wait_for_traffic(&self, check: impl Fn(&TrafficSnapshot) -> bool) -> TrafficSnapshot {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let snapshot = self.counters.snapshot();
            if check(&snapshot) {
                return snapshot;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("traffic counters never matched: {:?}", snapshot);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn rule(pattern: &str, method: ForwardMethod) -> ForwardingRule {
    ForwardingRule::new(pattern, method)
}

pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.timeouts.connect_secs = 2;
    config.timeouts.idle_secs = 5;
    config.timeouts.drain_secs = 2;
    config
}

/// Start a proxy with `rules` in front of `upstreams`.
pub async fn start_proxy(rules: Vec<ForwardingRule>, upstreams: Arc<UpstreamPair>) -> RunningProxy {
    start_proxy_with(test_config(), rules, upstreams).await
}

/// Like [`start_proxy`], with an explicit configuration.
pub async fn start_proxy_with(
    config: ProxyConfig,
    rules: Vec<ForwardingRule>,
    upstreams: Arc<UpstreamPair>,
) -> RunningProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counters = Arc::new(TrafficCounters::new());
    let shutdown = Shutdown::new();

    let server = ProxyServer::new(&config, Router::new(rules), Arc::clone(&upstreams), Arc::clone(&counters));
    let handle = tokio::spawn(server.run(Listener::from(listener), shutdown.subscribe()));

    RunningProxy {
        addr,
        counters,
        upstreams,
        shutdown,
        handle,
    }
}

/// Read until the proxy closes the connection. Resets count as closed.
pub async fn read_until_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let result = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received))
        .await
        .expect("proxy did not close the connection");
    if let Err(e) = result {
        assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset, "unexpected error: {e}");
    }
    received
}
