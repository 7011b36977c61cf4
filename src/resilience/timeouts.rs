//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap outbound dials with a connect deadline
//! - Turn an elapsed deadline into an `io::Error` of kind `TimedOut`
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors (by `ErrorKind`)
//! - Nothing here retries; a failed dial is final

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

/// Run `fut`, failing with `ErrorKind::TimedOut` after `limit`.
pub async fn deadline<T, F>(limit: Duration, what: &str, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} timed out after {:?}", what, limit),
        )),
    }
}

/// Open a TCP connection to `addr` (`host:port`) within `limit`.
pub async fn connect(addr: &str, limit: Duration) -> io::Result<TcpStream> {
    let stream = deadline(limit, "connect", TcpStream::connect(addr)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// True for errors that only mean the peer already went away.
pub fn is_closed(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
