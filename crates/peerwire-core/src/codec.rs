//! Payload codec seam.
//!
//! The runtime never looks inside payloads; callers and handler tables
//! marshal typed messages through a [`Codec`]. Any codec that
//! deterministically round-trips a value satisfies the contract, so peers
//! can be instantiated over a different wire format without touching the
//! runtime.

use serde::{de::DeserializeOwned, Serialize};

use crate::{DecodeError, EncodeError};

/// Structured-message codec.
///
/// Implementations are stateless values; anything that needs runtime state
/// (ciphers, schema registries) should use interior mutability.
pub trait Codec: Default + Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, EncodeError>;

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, DecodeError>;
}

/// Default codec: postcard's compact binary encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostcardCodec;

impl Codec for PostcardCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        postcard::to_stdvec(value).map_err(|e| EncodeError::EncodeFailed(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, DecodeError> {
        match postcard::from_bytes(buf) {
            Ok(value) => Ok(value),
            Err(postcard::Error::DeserializeUnexpectedEnd) => Err(DecodeError::UnexpectedEof),
            Err(e) => Err(DecodeError::InvalidData(e.to_string())),
        }
    }
}
