//! Request ingestion and parsing.
//!
//! # Responsibilities
//! - Read the request head off the raw client connection
//! - Read exactly `Content-Length` body bytes, if declared
//! - Parse the head into a typed [`RequestHead`]
//! - Re-serialize the head for plain-HTTP forwarding
//!
//! # Design Decisions
//! - The head bytes are kept verbatim for CONNECT relaying
//! - Header size limits enforced before the body is read
//! - Hop-by-hop connection headers are replaced on re-serialization

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncReadExt};

use crate::config::schema::LimitsConfig;
use crate::http::head::{find_header, header_lines, read_head_idle, HeadError};
use crate::resilience::timeouts;

/// Headers that describe the client↔proxy connection only.
const HOP_BY_HOP: [&str; 3] = ["connection", "proxy-connection", "keep-alive"];

#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Head(#[from] HeadError),
    #[error("failed to read request body: {0}")]
    Body(#[source] std::io::Error),
    #[error("malformed request line `{0}`")]
    RequestLine(String),
    #[error("malformed header line `{0}`")]
    HeaderLine(String),
    #[error("invalid Content-Length `{0}`")]
    ContentLength(String),
    #[error("body of {length} bytes exceeds limit of {limit}")]
    BodyTooLarge { length: u64, limit: usize },
}

/// Parsed request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub content_length: Option<u64>,
}

impl RequestHead {
    /// Parse a complete head (start line, headers, blank line).
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let first = text.lines().next().unwrap_or_default();
        let mut fields = first.split(' ').filter(|f| !f.is_empty());
        let (method, target, version) = match (fields.next(), fields.next(), fields.next()) {
            (Some(m), Some(t), Some(v)) => (m, t, v),
            _ => return Err(RequestError::RequestLine(first.to_string())),
        };

        let mut headers = Vec::new();
        for line in header_lines(text) {
            let (name, value) = line.map_err(|l| RequestError::HeaderLine(l.to_string()))?;
            headers.push((name.to_string(), value.to_string()));
        }

        let content_length = match find_header(&headers, "content-length") {
            Some(value) => Some(
                value
                    .parse::<u64>()
                    .map_err(|_| RequestError::ContentLength(value.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
            content_length,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Serialize with a new request target and `Connection: close`.
    ///
    /// `host` is used when the original request carried no `Host` header.
    pub fn serialize_for_forwarding(&self, target: &str, host: &str) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, target, self.version);
        if self.header("host").is_none() {
            out.push_str(&format!("Host: {}\r\n", host));
        }
        for (name, value) in &self.headers {
            if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("Connection: close\r\n\r\n");
        out.into_bytes()
    }
}

/// A request as read from the client.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub head: RequestHead,
    /// Head bytes exactly as received, blank line included.
    pub raw_head: Vec<u8>,
    pub body: Vec<u8>,
}

/// Read one request from the client.
///
/// Each read must make progress within `idle`. Bytes the client sent after
/// the request stay buffered in `reader`.
pub async fn read_request<R>(reader: &mut R, limits: &LimitsConfig, idle: Duration) -> Result<RawRequest, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let raw_head = read_head_idle(reader, limits.max_header_bytes, idle).await?;
    let text = std::str::from_utf8(&raw_head).map_err(|_| HeadError::NotUtf8)?;
    let head = RequestHead::parse(text)?;

    let body = match head.content_length {
        Some(length) if length > limits.max_body_bytes as u64 => {
            return Err(RequestError::BodyTooLarge {
                length,
                limit: limits.max_body_bytes,
            });
        }
        Some(length) => read_body(reader, length as usize, idle).await.map_err(RequestError::Body)?,
        None => Vec::new(),
    };

    Ok(RawRequest { head, raw_head, body })
}

async fn read_body<R>(reader: &mut R, length: usize, idle: Duration) -> std::io::Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::with_capacity(length);
    while body.len() < length {
        let remaining = (length - body.len()) as u64;
        let n = timeouts::deadline(idle, "body read", (&mut *reader).take(remaining).read_buf(&mut body)).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    const IDLE: Duration = Duration::from_secs(1);

    fn limits() -> LimitsConfig {
        LimitsConfig::default()
    }

    #[tokio::test]
    async fn reads_connect_head_verbatim() {
        let wire: &[u8] = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n\x16\x03\x01";
        let mut reader = BufReader::new(wire);
        let request = read_request(&mut reader, &limits(), IDLE).await.unwrap();

        assert_eq!(request.raw_head, &wire[..wire.len() - 3]);
        assert!(request.head.is_connect());
        assert_eq!(request.head.target, "example.com:443");
        assert!(request.body.is_empty());

        // Pipelined bytes stay for the tunnel.
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"\x16\x03\x01");
    }

    #[tokio::test]
    async fn reads_exactly_content_length_body() {
        let wire: &[u8] = b"POST http://a.com/x HTTP/1.1\r\ncontent-length: 5\r\n\r\nhelloEXTRA";
        let mut reader = BufReader::new(wire);
        let request = read_request(&mut reader, &limits(), IDLE).await.unwrap();
        assert_eq!(request.head.content_length, Some(5));
        assert_eq!(request.body, b"hello");
    }

    #[tokio::test]
    async fn short_body_is_an_error() {
        let wire: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        let err = read_request(&mut BufReader::new(wire), &limits(), IDLE).await.unwrap_err();
        assert!(matches!(err, RequestError::Body(_)));
    }

    #[tokio::test]
    async fn body_limit_is_enforced() {
        let wire: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n";
        let limits = LimitsConfig {
            max_body_bytes: 10,
            ..LimitsConfig::default()
        };
        let err = read_request(&mut BufReader::new(wire), &limits, IDLE).await.unwrap_err();
        assert!(matches!(err, RequestError::BodyTooLarge { length: 100, limit: 10 }));
    }

    #[tokio::test]
    async fn truncated_head_is_an_error() {
        let wire: &[u8] = b"GET / HTTP/1.1\r\nHost: a\r\n";
        let err = read_request(&mut BufReader::new(wire), &limits(), IDLE).await.unwrap_err();
        assert!(matches!(err, RequestError::Head(HeadError::Truncated)));
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let (_client, quiet) = tokio::io::duplex(64);
        let err = read_request(&mut BufReader::new(quiet), &limits(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Head(HeadError::Read(ref e)) if e.kind() == std::io::ErrorKind::TimedOut));
    }

    #[tokio::test]
    async fn stalled_body_times_out() {
        use tokio::io::AsyncWriteExt;

        let (mut client, quiet) = tokio::io::duplex(256);
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();
        let err = read_request(&mut BufReader::new(quiet), &limits(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Body(ref e) if e.kind() == std::io::ErrorKind::TimedOut));
    }

    #[test]
    fn request_line_needs_three_fields() {
        let err = RequestHead::parse("CONNECT example.com:443\r\n\r\n").unwrap_err();
        assert!(matches!(err, RequestError::RequestLine(_)));
    }

    #[test]
    fn invalid_content_length_is_rejected() {
        let err = RequestHead::parse("POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n").unwrap_err();
        assert!(matches!(err, RequestError::ContentLength(_)));
    }

    #[test]
    fn forwarding_replaces_connection_headers() {
        let head = RequestHead::parse(
            "GET http://a.com/p?q=1 HTTP/1.1\r\nHost: a.com\r\nProxy-Connection: keep-alive\r\nAccept: */*\r\n\r\n",
        )
        .unwrap();
        let out = String::from_utf8(head.serialize_for_forwarding("/p?q=1", "a.com")).unwrap();
        assert_eq!(
            out,
            "GET /p?q=1 HTTP/1.1\r\nHost: a.com\r\nAccept: */*\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn forwarding_adds_missing_host() {
        let head = RequestHead::parse("GET http://a.com:8080/ HTTP/1.0\r\n\r\n").unwrap();
        let out = String::from_utf8(head.serialize_for_forwarding("/", "a.com:8080")).unwrap();
        assert!(out.starts_with("GET / HTTP/1.0\r\nHost: a.com:8080\r\n"));
    }
}
