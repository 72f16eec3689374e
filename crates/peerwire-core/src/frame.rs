//! Wire frame representation and length-prefixed framing.
//!
//! All integers on the wire are big-endian. A frame is a 4-byte total length
//! (counting everything *after* the length field itself) followed by a 4-byte
//! ID whose top bits classify the frame:
//!
//! ```text
//! Request          len | id(bit31=0) | name_len u8 | method name | payload
//! Response         len | id(bit31=1, bit30=0, low 30 = correlation) | payload
//! Error response   len | id(bit31=1, bit30=1, low 30 = correlation) | code u32 | message utf-8
//! ```
//!
//! The error-response bit lives on the *response* ID only; request IDs always
//! have bits 31 and 30 clear so the low 30 bits can serve as the correlation
//! value on both sides.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{ErrorCode, FrameError, TransportError};

/// Largest frame (total_length) accepted on either direction: 10 MiB.
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Bit 31: set on response IDs, clear on request IDs.
pub const RESPONSE_BIT: u32 = 0x8000_0000;

/// Bit 30: set on error-response IDs. Meaningless on requests.
pub const ERROR_BIT: u32 = 0x4000_0000;

/// Low 30 bits: the correlation value shared by a request and its response.
pub const CORRELATION_MASK: u32 = 0x3FFF_FFFF;

/// Wire limit on the method-name length (one length byte).
pub const MAX_METHOD_NAME_LEN: usize = 255;

/// One decoded unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request {
        id: u32,
        method: String,
        payload: Vec<u8>,
    },
    Response {
        correlation: u32,
        is_error: bool,
        payload: Vec<u8>,
    },
}

impl Frame {
    /// Build an error-response frame: 4-byte code followed by the UTF-8 message.
    pub fn error_response(correlation: u32, code: ErrorCode, message: &str) -> Self {
        let mut payload = Vec::with_capacity(4 + message.len());
        payload.extend_from_slice(&(code as u32).to_be_bytes());
        payload.extend_from_slice(message.as_bytes());
        Frame::Response {
            correlation: correlation & CORRELATION_MASK,
            is_error: true,
            payload,
        }
    }

    /// Encode the frame, length prefix included.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        match self {
            Frame::Request {
                id,
                method,
                payload,
            } => {
                if *id == 0 || id & (RESPONSE_BIT | ERROR_BIT) != 0 {
                    return Err(FrameError::InvalidRequestId(*id));
                }
                if method.is_empty() || method.len() > MAX_METHOD_NAME_LEN || !method.is_ascii() {
                    return Err(FrameError::InvalidMethodName);
                }
                let total = 5 + method.len() + payload.len();
                if total > MAX_FRAME_SIZE as usize {
                    return Err(FrameError::Oversize { len: total });
                }
                let mut buf = Vec::with_capacity(4 + total);
                buf.extend_from_slice(&(total as u32).to_be_bytes());
                buf.extend_from_slice(&id.to_be_bytes());
                buf.push(method.len() as u8);
                buf.extend_from_slice(method.as_bytes());
                buf.extend_from_slice(payload);
                Ok(buf)
            }
            Frame::Response {
                correlation,
                is_error,
                payload,
            } => {
                let total = 4 + payload.len();
                if total > MAX_FRAME_SIZE as usize {
                    return Err(FrameError::Oversize { len: total });
                }
                let mut id = (correlation & CORRELATION_MASK) | RESPONSE_BIT;
                if *is_error {
                    id |= ERROR_BIT;
                }
                let mut buf = Vec::with_capacity(4 + total);
                buf.extend_from_slice(&(total as u32).to_be_bytes());
                buf.extend_from_slice(&id.to_be_bytes());
                buf.extend_from_slice(payload);
                Ok(buf)
            }
        }
    }

    /// Read and decode exactly one frame.
    ///
    /// EOF before the first length byte decodes as [`TransportError::Closed`]
    /// (a clean shutdown); EOF anywhere later is [`FrameError::Truncated`].
    /// Short reads are retried to completion by `read_exact`.
    pub async fn read_from<R>(reader: &mut R) -> Result<Frame, TransportError>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        if let Err(e) = reader.read_exact(&mut len_buf).await {
            return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                e.into()
            });
        }
        let total_length = u32::from_be_bytes(len_buf);
        if !(4..=MAX_FRAME_SIZE).contains(&total_length) {
            return Err(FrameError::InvalidLength(total_length).into());
        }

        let mut id_buf = [0u8; 4];
        read_exact_frame(reader, &mut id_buf).await?;
        let id = u32::from_be_bytes(id_buf);

        if id & RESPONSE_BIT == 0 {
            // Request: one length byte, the method name, then the payload.
            let mut name_len = [0u8; 1];
            read_exact_frame(reader, &mut name_len).await?;
            let method_len = name_len[0];
            if u32::from(method_len) + 5 > total_length {
                return Err(FrameError::MethodNameOverrun {
                    method_len,
                    total_length,
                }
                .into());
            }
            let mut method_buf = vec![0u8; method_len as usize];
            read_exact_frame(reader, &mut method_buf).await?;
            if !method_buf.is_ascii() {
                return Err(FrameError::InvalidMethodName.into());
            }
            let method = String::from_utf8(method_buf)
                .map_err(|_| TransportError::Frame(FrameError::InvalidMethodName))?;

            let payload_len = total_length as usize - 5 - method_len as usize;
            let mut payload = vec![0u8; payload_len];
            read_exact_frame(reader, &mut payload).await?;

            Ok(Frame::Request {
                id,
                method,
                payload,
            })
        } else {
            let payload_len = total_length as usize - 4;
            let mut payload = vec![0u8; payload_len];
            read_exact_frame(reader, &mut payload).await?;

            Ok(Frame::Response {
                correlation: id & CORRELATION_MASK,
                is_error: id & ERROR_BIT != 0,
                payload,
            })
        }
    }
}

/// `read_exact` with mid-frame EOF mapped to [`FrameError::Truncated`].
async fn read_exact_frame<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    reader.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Frame(FrameError::Truncated)
        } else {
            e.into()
        }
    })?;
    Ok(())
}

/// Parse the payload of an error-response frame into a code and message.
///
/// Tolerant of malformed payloads: anything shorter than the 4-byte code
/// yields `Unknown` with a placeholder message rather than a decode failure.
pub fn parse_error_payload(payload: &[u8]) -> (ErrorCode, String) {
    if payload.len() < 4 {
        return (ErrorCode::Unknown, "malformed error response".to_string());
    }
    let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let code = ErrorCode::from_u32(raw).unwrap_or(ErrorCode::Unknown);
    let message = String::from_utf8_lossy(&payload[4..]).into_owned();
    (code, message)
}
