//! Calculator client over TCP.
//!
//! Connects to the tcp_server example, registers a Greeter service the
//! server will call back, and runs a few calculator calls.
//!
//! Run with: `cargo run --example tcp_client -p peerwire`

use std::sync::Arc;

use peerwire::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i32,
    b: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddResponse {
    result: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct MultiplyRequest {
    a: i32,
    b: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct MultiplyResponse {
    result: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloRequest {
    from: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloResponse {
    greeting: String,
}

/// Thin typed wrapper over `call`, shaped like generated client stubs.
struct CalculatorClient {
    peer: Arc<RpcPeer>,
}

impl CalculatorClient {
    fn new(peer: Arc<RpcPeer>) -> Self {
        Self { peer }
    }

    async fn add(&self, a: i32, b: i32) -> Result<i32, RpcError> {
        let response: AddResponse = self.peer.call("Calculator.Add", &AddRequest { a, b }).await?;
        Ok(response.result)
    }

    async fn multiply(&self, a: i32, b: i32) -> Result<i32, RpcError> {
        let response: MultiplyResponse = self
            .peer
            .call("Calculator.Multiply", &MultiplyRequest { a, b })
            .await?;
        Ok(response.result)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let peer = peerwire::server::connect("127.0.0.1:9000").await?;

    peer.register_service(
        "Greeter",
        ServiceTable::new().method("Hello", |_ctx, req: HelloRequest| async move {
            println!("greeted by {}", req.from);
            HelloResponse {
                greeting: format!("hello back, {}!", req.from),
            }
        }),
    );

    let calculator = CalculatorClient::new(Arc::clone(&peer));
    println!("5 + 3 = {}", calculator.add(5, 3).await?);
    println!("4 * 7 = {}", calculator.multiply(4, 7).await?);

    // Unknown methods come back as typed remote errors, not broken streams.
    let divide: Result<AddResponse, RpcError> = peer
        .call("Calculator.Divide", &AddRequest { a: 1, b: 2 })
        .await;
    if let Err(RpcError::Remote { code, message }) = divide {
        println!("Divide rejected as expected ({code}): {message}");
    }

    peer.close().await;
    Ok(())
}
