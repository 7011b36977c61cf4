//! Bidirectional byte relay.
//!
//! # Responsibilities
//! - Copy bytes in fixed-size chunks between two streams, in both directions
//! - Report bytes per direction as they are written
//! - End a direction on EOF, error or idle timeout
//!
//! # Design Decisions
//! - Each direction runs until its own source ends; the relay returns when
//!   both have ended (a client may half-close and still read the reply)
//! - A clean end shuts down the write side of the opposite stream
//! - The idle clock is shared: a direction only times out if neither
//!   direction moved a byte for the whole window
//! - Both streams are owned by the relay and dropped exactly once when it returns

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::resilience::timeouts::is_closed;

/// Bytes moved per read.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Last time any byte moved, shared by both directions of a relay.
#[derive(Debug)]
pub struct Activity {
    start: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = self.start.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.start.elapsed().saturating_sub(last)
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Why one direction stopped.
#[derive(Debug)]
pub enum EndReason {
    /// The source reached end of stream.
    Eof,
    /// The byte limit was reached.
    Limit,
    IdleTimeout,
    /// The source was reset or closed under us.
    PeerClosed(io::Error),
    ReadFailed(io::Error),
    WriteFailed(io::Error),
}

impl EndReason {
    /// Ends that need no attention in logs.
    pub fn is_clean(&self) -> bool {
        match self {
            EndReason::Eof | EndReason::Limit | EndReason::PeerClosed(_) => true,
            EndReason::WriteFailed(e) => is_closed(e),
            _ => false,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Eof => f.write_str("eof"),
            EndReason::Limit => f.write_str("limit reached"),
            EndReason::IdleTimeout => f.write_str("idle timeout"),
            EndReason::PeerClosed(e) => write!(f, "peer closed: {}", e),
            EndReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            EndReason::WriteFailed(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// How one direction ended.
#[derive(Debug)]
pub struct DirectionEnd {
    pub bytes: u64,
    pub reason: EndReason,
}

/// Result of a full relay.
#[derive(Debug)]
pub struct RelayOutcome {
    pub a_to_b: DirectionEnd,
    pub b_to_a: DirectionEnd,
}

impl RelayOutcome {
    pub fn total_bytes(&self) -> u64 {
        self.a_to_b.bytes + self.b_to_a.bytes
    }
}

/// Copy from `reader` to `writer` until EOF, error, `limit` bytes or an idle
/// window with no activity.
///
/// `on_bytes` is called after every successful write with the chunk size.
pub async fn copy_with_idle<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    idle: Duration,
    limit: Option<u64>,
    activity: &Activity,
    mut on_bytes: F,
) -> DirectionEnd
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64),
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;

    let reason = loop {
        let want = match limit {
            Some(limit) if bytes >= limit => break EndReason::Limit,
            Some(limit) => CHUNK_SIZE.min((limit - bytes) as usize),
            None => CHUNK_SIZE,
        };

        let wait = idle.saturating_sub(activity.idle_for());
        if wait.is_zero() {
            break EndReason::IdleTimeout;
        }
        let n = match tokio::time::timeout(wait, reader.read(&mut buf[..want])).await {
            // Re-check against the shared clock; the other direction may have moved.
            Err(_) => continue,
            Ok(Ok(0)) if limit.is_some() => {
                break EndReason::ReadFailed(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} bytes", bytes),
                ));
            }
            Ok(Ok(0)) => break EndReason::Eof,
            Ok(Ok(n)) => n,
            Ok(Err(e)) if is_closed(&e) => break EndReason::PeerClosed(e),
            Ok(Err(e)) => break EndReason::ReadFailed(e),
        };

        activity.touch();
        if let Err(e) = writer.write_all(&buf[..n]).await {
            break EndReason::WriteFailed(e);
        }
        bytes += n as u64;
        on_bytes(n as u64);
    };

    if let Err(e) = writer.flush().await {
        tracing::trace!(error = %e, "Flush after relay end failed");
    }
    DirectionEnd { bytes, reason }
}

/// Relay between `a` and `b` until both directions have ended.
///
/// `on_a_to_b` and `on_b_to_a` receive byte counts as they are delivered.
pub async fn relay<A, B, F, G>(a: A, b: B, idle: Duration, mut on_a_to_b: F, mut on_b_to_a: G) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
    F: FnMut(u64),
    G: FnMut(u64),
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let activity = Activity::new();

    let forward = async {
        let end = copy_with_idle(&mut a_read, &mut b_write, idle, None, &activity, &mut on_a_to_b).await;
        let _ = b_write.shutdown().await;
        end
    };
    let backward = async {
        let end = copy_with_idle(&mut b_read, &mut a_write, idle, None, &activity, &mut on_b_to_a).await;
        let _ = a_write.shutdown().await;
        end
    };

    let (a_to_b, b_to_a) = tokio::join!(forward, backward);
    RelayOutcome { a_to_b, b_to_a }
}
