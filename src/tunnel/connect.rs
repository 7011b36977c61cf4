//! Tunnel establishment.
//!
//! # Responsibilities
//! - Block: close the client without writing anything
//! - Direct: dial the target and answer the client ourselves
//! - Proxy: replay the request head to the upstream and relay its answer
//! - Relay both directions and account the bytes
//!
//! # Design Decisions
//! - Only a `200` from the upstream enters the relay; any other status is
//!   passed to the client and the session ends
//! - Only relayed application bytes are counted, handshake bytes are not
//! - Dial failures are final (no retry)

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::http::request::RawRequest;
use crate::http::response::read_response_head;
use crate::observability::metrics::Direction;
use crate::resilience::timeouts;
use crate::routing::ForwardMethod;
use crate::tunnel::relay::{relay, RelayOutcome};
use crate::tunnel::session::{ConnectionSession, SessionState, TunnelContext, TunnelError};

/// Answer written to the client when we dial the target ourselves.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Establish the tunnel for `session` and relay until both sides are done.
///
/// `client` is consumed; bytes the client pipelined after the request are
/// still buffered in it and go out first. Returns `None` for blocked sessions.
pub async fn open_tunnel<C>(
    session: &mut ConnectionSession,
    mut client: C,
    request: &RawRequest,
    ctx: &TunnelContext,
) -> Result<Option<RelayOutcome>, TunnelError>
where
    C: AsyncBufRead + AsyncWrite + Unpin,
{
    if session.method() == ForwardMethod::Block {
        session.transition(SessionState::Closed);
        tracing::info!(
            connection_id = %session.id(),
            target = %session.target(),
            protocol = %session.protocol(),
            "Blocked"
        );
        return Ok(None);
    }

    let address = session.upstream()?.to_string();
    session.transition(SessionState::Connecting);
    let upstream = match timeouts::connect(&address, ctx.connect_timeout).await {
        Ok(stream) => stream,
        Err(source) => {
            session.transition(SessionState::Rejected);
            return Err(TunnelError::Dial { address, source });
        }
    };
    let mut upstream = BufReader::new(upstream);

    match session.method() {
        ForwardMethod::Proxy => {
            let mut handshake = Vec::with_capacity(request.raw_head.len() + request.body.len());
            handshake.extend_from_slice(&request.raw_head);
            handshake.extend_from_slice(&request.body);
            if let Err(source) = upstream.write_all(&handshake).await {
                session.transition(SessionState::Rejected);
                return Err(TunnelError::Write { peer: "upstream", source });
            }

            let response = read_response_head(&mut upstream, ctx.max_header_bytes, Some(ctx.idle_timeout)).await;
            let (raw, head) = match response {
                Ok(response) => response,
                Err(source) => {
                    session.transition(SessionState::Rejected);
                    return Err(TunnelError::Response { address, source });
                }
            };
            if let Err(source) = client.write_all(&raw).await {
                session.transition(SessionState::Rejected);
                return Err(TunnelError::Write { peer: "client", source });
            }
            if head.status != 200 {
                session.transition(SessionState::Rejected);
                let _ = client.shutdown().await;
                return Err(TunnelError::Rejected(head.status_line()));
            }
        }
        _ => {
            if let Err(source) = client.write_all(CONNECTION_ESTABLISHED).await {
                session.transition(SessionState::Rejected);
                return Err(TunnelError::Write { peer: "client", source });
            }
        }
    }
    session.transition(SessionState::Established);

    session.transition(SessionState::Relaying);
    let method = session.method();
    let counters = &ctx.counters;
    let outcome = relay(
        client,
        upstream,
        ctx.idle_timeout,
        |n| counters.record(method, Direction::Upload, n),
        |n| counters.record(method, Direction::Download, n),
    )
    .await;

    session.log_direction("upload", &outcome.a_to_b);
    session.log_direction("download", &outcome.b_to_a);
    session.transition(SessionState::Closed);
    tracing::info!(
        connection_id = %session.id(),
        target = %session.target(),
        protocol = %session.protocol(),
        method = %method,
        upload_bytes = outcome.a_to_b.bytes,
        download_bytes = outcome.b_to_a.bytes,
        "Tunnel closed"
    );
    Ok(Some(outcome))
}
