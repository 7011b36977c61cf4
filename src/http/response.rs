//! Response handling.
//!
//! # Responsibilities
//! - Read and parse upstream/origin response heads
//! - Relay exactly one HTTP response to the client
//!
//! # Design Decisions
//! - Response heads are written to the client verbatim
//! - Body framing: none for HEAD and 1xx/204/304, `Content-Length` bytes when
//!   declared, otherwise until the origin closes (we always send
//!   `Connection: close`)
//! - Interim 1xx responses are relayed and the final one is read after them

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use crate::http::head::{find_header, header_lines, read_head, read_head_idle, HeadError};
use crate::tunnel::relay::{copy_with_idle, Activity, EndReason};

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error(transparent)]
    Head(#[from] HeadError),
    #[error("malformed status line `{0}`")]
    StatusLine(String),
    #[error("invalid Content-Length `{0}`")]
    ContentLength(String),
    #[error("failed to write response to client: {0}")]
    ClientWrite(#[source] std::io::Error),
    #[error("response body relay ended early: {0}")]
    Body(String),
}

/// Parsed status line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn parse(text: &str) -> Result<Self, ResponseError> {
        let first = text.lines().next().unwrap_or_default();
        let mut parts = first.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let status = parts.next().and_then(|s| s.parse::<u16>().ok());
        let status = match status {
            Some(status) if version.starts_with("HTTP/") => status,
            _ => return Err(ResponseError::StatusLine(first.to_string())),
        };
        let reason = parts.next().unwrap_or_default().trim().to_string();

        let headers = header_lines(text)
            .filter_map(Result::ok)
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();

        Ok(Self {
            version: version.to_string(),
            status,
            reason,
            headers,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The status line, for logs.
    pub fn status_line(&self) -> String {
        format!("{} {} {}", self.version, self.status, self.reason)
    }

    fn is_interim(&self) -> bool {
        (100..200).contains(&self.status) && self.status != 101
    }

    fn has_body(&self, request_method: &str) -> bool {
        !(request_method.eq_ignore_ascii_case("HEAD")
            || self.is_interim()
            || self.status == 204
            || self.status == 304)
    }
}

/// Read a response head and parse it. Returns the raw bytes as well.
///
/// With `idle` set, each read must make progress within it.
pub async fn read_response_head<R>(
    reader: &mut R,
    max_bytes: usize,
    idle: Option<Duration>,
) -> Result<(Vec<u8>, ResponseHead), ResponseError>
where
    R: AsyncBufRead + Unpin,
{
    let raw = match idle {
        Some(idle) => read_head_idle(reader, max_bytes, idle).await?,
        None => read_head(reader, max_bytes).await?,
    };
    let text = std::str::from_utf8(&raw).map_err(|_| HeadError::NotUtf8)?;
    let head = ResponseHead::parse(text)?;
    Ok((raw, head))
}

/// Relay one complete response from `origin` to `client`.
///
/// `on_bytes` sees every chunk written to the client, head bytes included.
/// Returns the total written.
pub async fn relay_response<R, W, F>(
    origin: &mut R,
    client: &mut W,
    request_method: &str,
    max_head_bytes: usize,
    idle: Duration,
    mut on_bytes: F,
) -> Result<u64, ResponseError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let mut written = 0u64;
    let head = loop {
        let (raw, head) = read_response_head(origin, max_head_bytes, Some(idle)).await?;
        client.write_all(&raw).await.map_err(ResponseError::ClientWrite)?;
        written += raw.len() as u64;
        on_bytes(raw.len() as u64);
        if !head.is_interim() {
            break head;
        }
        tracing::trace!(status = head.status, "Relayed interim response");
    };

    if !head.has_body(request_method) {
        client.flush().await.map_err(ResponseError::ClientWrite)?;
        return Ok(written);
    }

    let limit = match head.header("content-length") {
        Some(value) => Some(
            value
                .parse::<u64>()
                .map_err(|_| ResponseError::ContentLength(value.to_string()))?,
        ),
        None => None,
    };

    let activity = Activity::new();
    let end = copy_with_idle(origin, client, idle, limit, &activity, &mut on_bytes).await;
    written += end.bytes;
    match end.reason {
        EndReason::Eof | EndReason::Limit => Ok(written),
        EndReason::WriteFailed(e) => Err(ResponseError::ClientWrite(e)),
        other => Err(ResponseError::Body(other.to_string())),
    }
}
