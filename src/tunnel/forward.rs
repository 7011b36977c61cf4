//! Plain-HTTP forwarding.
//!
//! One request, one response, then the connection closes. Direct sessions
//! talk origin-form to the target; proxied sessions talk absolute-form to the
//! upstream.

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};

use crate::http::dispatch::HttpForward;
use crate::http::request::RawRequest;
use crate::http::response::relay_response;
use crate::observability::metrics::Direction;
use crate::resilience::timeouts;
use crate::routing::ForwardMethod;
use crate::tunnel::session::{ConnectionSession, SessionState, TunnelContext, TunnelError};

/// Forward `request` and relay exactly one response to `client`.
///
/// Returns the bytes sent upstream and the bytes relayed back.
pub async fn forward_http<C>(
    session: &mut ConnectionSession,
    client: &mut C,
    request: &RawRequest,
    forward: &HttpForward,
    ctx: &TunnelContext,
) -> Result<(u64, u64), TunnelError>
where
    C: AsyncWrite + Unpin,
{
    let method = session.method();
    if method == ForwardMethod::Block {
        session.transition(SessionState::Closed);
        tracing::info!(
            connection_id = %session.id(),
            target = %session.target(),
            protocol = %session.protocol(),
            "Blocked"
        );
        return Ok((0, 0));
    }

    let address = session.upstream()?.to_string();
    let request_target = match method {
        ForwardMethod::Proxy => forward.absolute_url(),
        _ => forward.path.clone(),
    };
    let mut outbound = request
        .head
        .serialize_for_forwarding(&request_target, &forward.host_header());
    outbound.extend_from_slice(&request.body);

    session.transition(SessionState::Connecting);
    let upstream = match timeouts::connect(&address, ctx.connect_timeout).await {
        Ok(stream) => stream,
        Err(source) => {
            session.transition(SessionState::Rejected);
            return Err(TunnelError::Dial { address, source });
        }
    };
    let mut upstream = BufReader::new(upstream);
    session.transition(SessionState::Established);

    session.transition(SessionState::Relaying);
    if let Err(source) = upstream.write_all(&outbound).await {
        session.transition(SessionState::Closed);
        return Err(TunnelError::Write { peer: "upstream", source });
    }
    let sent = outbound.len() as u64;
    ctx.counters.record(method, Direction::Upload, sent);

    let counters = &ctx.counters;
    let result = relay_response(
        &mut upstream,
        client,
        &request.head.method,
        ctx.max_header_bytes,
        ctx.idle_timeout,
        |n| counters.record(method, Direction::Download, n),
    )
    .await;
    session.transition(SessionState::Closed);

    let received = result.map_err(|source| TunnelError::Response { address, source })?;
    tracing::info!(
        connection_id = %session.id(),
        target = %session.target(),
        protocol = %session.protocol(),
        method = %method,
        upload_bytes = sent,
        download_bytes = received,
        "HTTP exchange complete"
    );
    Ok((sent, received))
}
