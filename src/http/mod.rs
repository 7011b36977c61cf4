//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, one task per connection)
//!     → request.rs (read head and body, parse into RequestHead)
//!     → dispatch.rs (tunnel or plain-HTTP forward, target host:port)
//!     → [routing layer decides direct / proxy / block]
//!     → [tunnel engine relays bytes]
//!     → response.rs (upstream and origin response heads)
//! ```

pub mod dispatch;
pub mod head;
pub mod request;
pub mod response;
pub mod server;

pub use dispatch::{dispatch, Dispatch, DispatchError, HttpForward, Target};
pub use request::{read_request, RawRequest, RequestError, RequestHead};
pub use response::{ResponseError, ResponseHead};
pub use server::{ConnectionError, ProxyServer, ProxyState};
