//! Header block reading.
//!
//! Reads a request or response head (start line plus header lines) up to and
//! including the terminating blank line, keeping the bytes verbatim so they can
//! be re-sent unchanged.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::resilience::timeouts;

#[derive(Debug, Error)]
pub enum HeadError {
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("stream ended before the end of the header block")]
    Truncated,
    #[error("header block exceeds {0} bytes")]
    TooLarge(usize),
    #[error("header block is not valid UTF-8")]
    NotUtf8,
}

/// Read up to and including the first empty line.
///
/// Both `\r\n` and bare `\n` line endings are accepted. Bytes after the blank
/// line stay in `reader`.
pub async fn read_head<R>(reader: &mut R, max_bytes: usize) -> Result<Vec<u8>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    read_head_inner(reader, max_bytes, None).await
}

/// Like [`read_head`], but every read must make progress within `idle`.
///
/// A silent peer fails with `HeadError::Read` of kind `TimedOut`.
pub async fn read_head_idle<R>(reader: &mut R, max_bytes: usize, idle: Duration) -> Result<Vec<u8>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    read_head_inner(reader, max_bytes, Some(idle)).await
}

async fn read_head_inner<R>(reader: &mut R, max_bytes: usize, idle: Option<Duration>) -> Result<Vec<u8>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(512);
    loop {
        let start = head.len();
        let remaining = max_bytes.saturating_sub(start) as u64;
        let mut limited = (&mut *reader).take(remaining);
        let read = limited.read_until(b'\n', &mut head);
        let n = match idle {
            Some(limit) => timeouts::deadline(limit, "header read", read).await?,
            None => read.await?,
        };
        if n == 0 {
            return Err(if start >= max_bytes {
                HeadError::TooLarge(max_bytes)
            } else {
                HeadError::Truncated
            });
        }

        let line = &head[start..];
        if !line.ends_with(b"\n") {
            // Either the limit cut the line or the stream ended mid-line;
            // the next read tells which.
            continue;
        }
        if line == b"\r\n" || line == b"\n" {
            return Ok(head);
        }
    }
}

/// Iterate over the header lines of a head, skipping the start line.
///
/// Yields `(name, value)` with surrounding whitespace trimmed, or `Err(line)`
/// for a line without a colon.
pub fn header_lines<'a>(text: &'a str) -> impl Iterator<Item = Result<(&'a str, &'a str), &'a str>> + 'a {
    text.lines()
        .skip(1)
        .take_while(|line| !line.is_empty())
        .map(|line| match line.split_once(':') {
            Some((name, value)) => Ok((name.trim(), value.trim())),
            None => Err(line),
        })
}

/// Case-insensitive lookup in a parsed header list.
pub fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
