//! peerwire-testkit: shared fixtures for exercising peers.
//!
//! Provides in-memory peer pairs, a calculator test service, and
//! bidirectional scenario runners used by the integration suites.
//!
//! # Usage
//!
//! ```ignore
//! use peerwire_testkit::{peer_pair, calculator_table, CalculatorClient};
//!
//! #[tokio::test]
//! async fn add_round_trip() {
//!     let (a, b) = peer_pair();
//!     b.register_service("Calculator", calculator_table());
//!     let client = CalculatorClient::new(a);
//!     assert_eq!(client.add(7, 5).await.unwrap(), 12);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use peerwire_core::{PeerOptions, RpcError, RpcPeer, ServiceTable};
use serde::{Deserialize, Serialize};
use tokio::io::DuplexStream;

pub mod bidirectional;

/// Buffer size for in-memory duplex pairs. Large enough that a peer can
/// park several frames without the other side reading.
const DUPLEX_BUFFER: usize = 256 * 1024;

/// Error type for test scenarios.
#[derive(Debug)]
pub enum TestError {
    /// Peer or stream setup failed.
    Setup(String),
    /// RPC call failed.
    Rpc(RpcError),
    /// Assertion failed.
    Assertion(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Setup(msg) => write!(f, "setup error: {msg}"),
            TestError::Rpc(e) => write!(f, "RPC error: {e}"),
            TestError::Assertion(msg) => write!(f, "assertion failed: {msg}"),
        }
    }
}

impl std::error::Error for TestError {}

impl From<RpcError> for TestError {
    fn from(e: RpcError) -> Self {
        TestError::Rpc(e)
    }
}

/// A connected pair of peers over an in-memory duplex stream.
pub fn peer_pair() -> (Arc<RpcPeer>, Arc<RpcPeer>) {
    peer_pair_with_options(PeerOptions::default(), PeerOptions::default())
}

/// Like [`peer_pair`], with explicit options per side.
pub fn peer_pair_with_options(a: PeerOptions, b: PeerOptions) -> (Arc<RpcPeer>, Arc<RpcPeer>) {
    let (stream_a, stream_b) = tokio::io::duplex(DUPLEX_BUFFER);
    (
        RpcPeer::with_options(stream_a, a),
        RpcPeer::with_options(stream_b, b),
    )
}

/// One peer plus the raw other end of its stream, for wire-level tests
/// (malformed frames, abrupt teardown).
pub fn raw_pair() -> (DuplexStream, Arc<RpcPeer>) {
    let (raw, stream) = tokio::io::duplex(DUPLEX_BUFFER);
    (raw, RpcPeer::new(stream))
}

/// Options with a short call timeout, for tests that exercise the timeout path.
pub fn short_timeout_options(timeout: Duration) -> PeerOptions {
    PeerOptions {
        call_timeout: timeout,
        ..PeerOptions::default()
    }
}

// ============================================================================
// Test service: Calculator
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AddRequest {
    pub a: i32,
    pub b: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AddResponse {
    pub result: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MultiplyRequest {
    pub a: i32,
    pub b: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MultiplyResponse {
    pub result: i32,
}

/// Handler table for the calculator test service.
pub fn calculator_table() -> ServiceTable {
    ServiceTable::new()
        .method("Add", |_ctx, req: AddRequest| async move {
            AddResponse {
                result: req.a + req.b,
            }
        })
        .method("Multiply", |_ctx, req: MultiplyRequest| async move {
            MultiplyResponse {
                result: req.a * req.b,
            }
        })
}

/// Typed client wrapper, shaped the way the stub generator emits them.
pub struct CalculatorClient {
    peer: Arc<RpcPeer>,
}

impl CalculatorClient {
    pub fn new(peer: Arc<RpcPeer>) -> Self {
        Self { peer }
    }

    pub async fn add(&self, a: i32, b: i32) -> Result<i32, RpcError> {
        let response: AddResponse = self.peer.call("Calculator.Add", &AddRequest { a, b }).await?;
        Ok(response.result)
    }

    pub async fn multiply(&self, a: i32, b: i32) -> Result<i32, RpcError> {
        let response: MultiplyResponse = self
            .peer
            .call("Calculator.Multiply", &MultiplyRequest { a, b })
            .await?;
        Ok(response.result)
    }
}

// ============================================================================
// Test service: Sleeper (for timeout scenarios)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NapRequest {
    pub millis: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NapResponse {
    pub slept_millis: u64,
}

/// A service whose handler sleeps for the requested duration before replying.
pub fn sleeper_table() -> ServiceTable {
    ServiceTable::new().method("Nap", |_ctx, req: NapRequest| async move {
        tokio::time::sleep(Duration::from_millis(req.millis)).await;
        NapResponse {
            slept_millis: req.millis,
        }
    })
}
