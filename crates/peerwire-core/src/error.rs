//! Error codes and error types.

use core::fmt;
use std::sync::Arc;

/// Framework-level error codes carried in error-response frames.
///
/// The numeric values are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    Unknown = 0,
    MethodNotFound = 1,
    InvalidRequest = 2,
    MalformedRequest = 3,
    InvalidMessageFormat = 4,
    InternalError = 5,
}

impl ErrorCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::MethodNotFound),
            2 => Some(Self::InvalidRequest),
            3 => Some(Self::MalformedRequest),
            4 => Some(Self::InvalidMessageFormat),
            5 => Some(Self::InternalError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::MethodNotFound => write!(f, "method not found"),
            Self::InvalidRequest => write!(f, "invalid request"),
            Self::MalformedRequest => write!(f, "malformed request"),
            Self::InvalidMessageFormat => write!(f, "invalid message format"),
            Self::InternalError => write!(f, "internal error"),
        }
    }
}

/// Frame-level decode/encode failures.
///
/// Any of these on the inbound path is terminal for the peer: a stream that
/// produced a malformed frame can no longer be trusted to be in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// total_length outside `[4, MAX_FRAME_SIZE]`.
    InvalidLength(u32),
    /// Outbound frame would exceed `MAX_FRAME_SIZE`.
    Oversize { len: usize },
    /// Method-name length does not fit in the declared total length.
    MethodNameOverrun { method_len: u8, total_length: u32 },
    /// Method name is empty, non-ASCII, or longer than 255 bytes.
    InvalidMethodName,
    /// Request ID is zero or has a response/error bit set.
    InvalidRequestId(u32),
    /// Stream ended in the middle of a frame.
    Truncated,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength(len) => write!(f, "invalid frame length: {len} bytes"),
            Self::Oversize { len } => write!(f, "frame of {len} bytes exceeds maximum"),
            Self::MethodNameOverrun {
                method_len,
                total_length,
            } => write!(
                f,
                "method name of {method_len} bytes overruns frame length {total_length}"
            ),
            Self::InvalidMethodName => write!(f, "invalid method name"),
            Self::InvalidRequestId(id) => write!(f, "invalid request id: {id:#010x}"),
            Self::Truncated => write!(f, "stream ended mid-frame"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Transport-level errors.
///
/// Cloneable so a single terminal error can be handed to the close observer,
/// the `wait()` caller, and any observer registered after termination.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The stream was closed cleanly at a frame boundary.
    Closed,
    Io(Arc<std::io::Error>),
    Frame(FrameError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "stream closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Frame(e) => write!(f, "malformed frame: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e.as_ref()),
            Self::Frame(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<FrameError> for TransportError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

/// Payload encoding errors.
#[derive(Debug)]
pub enum EncodeError {
    EncodeFailed(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeFailed(msg) => write!(f, "encode failed: {msg}"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Payload decoding errors.
#[derive(Debug)]
pub enum DecodeError {
    UnexpectedEof,
    InvalidData(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
            Self::InvalidData(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// High-level RPC errors, as surfaced from [`RpcPeer::call`](crate::RpcPeer::call).
#[derive(Debug)]
pub enum RpcError {
    /// The request message failed to encode; nothing was written to the wire.
    Encode(EncodeError),
    /// The response payload failed to decode.
    Decode(DecodeError),
    /// The remote peer answered with an error-response frame.
    Remote { code: ErrorCode, message: String },
    /// No response arrived within the call timeout.
    Timeout,
    /// The peer shut down before (or while) the call completed.
    ConnectionClosed,
    Transport(TransportError),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Remote { code, message } => write!(f, "remote error ({code}): {message}"),
            Self::Timeout => write!(f, "call timed out"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EncodeError> for RpcError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<DecodeError> for RpcError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}
