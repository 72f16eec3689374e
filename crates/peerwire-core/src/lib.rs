//! peerwire-core: the runtime for the peerwire symmetric RPC system.
//!
//! This crate defines:
//! - The wire frame and framing codec ([`Frame`], [`MAX_FRAME_SIZE`])
//! - Error codes and error types ([`ErrorCode`], [`RpcError`], [`TransportError`])
//! - The payload codec seam ([`Codec`], [`PostcardCodec`])
//! - Ambient per-connection state ([`Session`], [`CallContext`])
//! - Service handler tables ([`ServiceTable`], [`DispatchError`])
//! - The per-connection state machine ([`RpcPeer`])
//!
//! Transports are not defined here: a peer consumes any
//! `AsyncRead + AsyncWrite` byte stream (TCP, Unix sockets, in-memory
//! duplex pairs, ...). Convenience constructors for common transports live
//! in the `peerwire` facade crate.

#![forbid(unsafe_op_in_unsafe_fn)]

mod codec;
mod error;
mod frame;
mod peer;
mod service;
mod session;

pub use codec::*;
pub use error::*;
pub use frame::*;
pub use peer::*;
pub use service::{DispatchError, ServiceTable};
pub use session::*;
