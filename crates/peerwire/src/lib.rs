//! peerwire: symmetric, bidirectional RPC over any reliable byte stream.
//!
//! Unlike classical client/server RPC, both endpoints of a peerwire
//! connection are peers: either side may register services and call the
//! other at any time on the same connection. Many concurrent calls are
//! multiplexed over one stream by a compact length-prefixed frame format.
//!
//! # Quick start
//!
//! ```ignore
//! use peerwire::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct AddRequest { a: i32, b: i32 }
//! #[derive(Serialize, Deserialize)]
//! struct AddResponse { result: i32 }
//!
//! // The accepting side registers a Calculator service:
//! peerwire::server::serve("127.0.0.1:9000", |peer| {
//!     peer.register_service(
//!         "Calculator",
//!         ServiceTable::new().method("Add", |_ctx, req: AddRequest| async move {
//!             AddResponse { result: req.a + req.b }
//!         }),
//!     );
//! }).await?;
//!
//! // The connecting side calls it — and may register services of its own
//! // that the accepting side calls back over the same connection:
//! let peer = peerwire::server::connect("127.0.0.1:9000").await?;
//! let sum: AddResponse = peer.call("Calculator.Add", &AddRequest { a: 7, b: 5 }).await?;
//! ```
//!
//! # Transports
//!
//! The runtime consumes any `AsyncRead + AsyncWrite` stream. The [`server`]
//! module provides TCP conveniences; for anything else (Unix sockets,
//! WebSocket byte channels, in-memory duplex pairs) hand the stream to
//! [`RpcPeer::new`] directly.
//!
//! # Error handling
//!
//! Calls return `Result<Resp, RpcError>`. Framework-level failures on the
//! remote side (unknown method, undecodable payload) arrive as
//! [`RpcError::Remote`] with a wire [`ErrorCode`]; business-level failures
//! belong inside response messages.

#![forbid(unsafe_op_in_unsafe_fn)]

pub use peerwire_core::{
    parse_error_payload, CallContext, Codec, DecodeError, DispatchError, EncodeError, ErrorCode,
    Frame, FrameError, PeerOptions, PostcardCodec, RawResponse, RpcError, RpcPeer, ServiceTable,
    Session, TransportError, CORRELATION_MASK, MAX_FRAME_SIZE, MAX_METHOD_NAME_LEN,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use peerwire::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{ErrorCode, PeerOptions, RpcError, RpcPeer, ServiceTable, Session};
}

/// TCP conveniences for running peers.
///
/// Both helpers produce ordinary [`RpcPeer`]s; "server" here only means
/// "the side that accepted the connection" — it may call the connecting
/// side's services all the same.
pub mod server {
    use std::sync::Arc;

    use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

    use crate::RpcPeer;

    /// Connect to `addr` and wrap the stream in a peer.
    pub async fn connect(addr: impl ToSocketAddrs) -> std::io::Result<Arc<RpcPeer>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(RpcPeer::new(stream))
    }

    /// Accept connections on `addr`, building a peer per connection and
    /// handing it to `setup` (which typically registers services and an
    /// observer). Runs until the listener fails.
    pub async fn serve<A, F>(addr: A, setup: F) -> std::io::Result<()>
    where
        A: ToSocketAddrs,
        F: Fn(Arc<RpcPeer>) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening");

        loop {
            let (stream, remote) = listener.accept().await?;
            tracing::debug!(remote = %remote, "accepted connection");
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(remote = %remote, error = %e, "failed to set TCP_NODELAY");
            }

            let peer = RpcPeer::new(stream);
            setup(Arc::clone(&peer));
            tokio::spawn(async move {
                match peer.wait().await {
                    Some(e) => tracing::warn!(remote = %remote, error = %e, "connection failed"),
                    None => tracing::debug!(remote = %remote, "connection closed"),
                }
            });
        }
    }
}
