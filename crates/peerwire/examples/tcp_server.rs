//! Calculator server over TCP.
//!
//! Accepts connections, serves a Calculator service, and — because peers are
//! symmetric — calls each connecting client's Greeter service once.
//!
//! Run with: `cargo run --example tcp_server -p peerwire`
//! Then start the client (see tcp_client example).

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

fn calculator() -> ServiceTable {
    ServiceTable::new()
        .method("Add", |_ctx, req: AddRequest| async move {
            let result = req.a + req.b;
            println!("handling Add: {} + {} = {}", req.a, req.b, result);
            AddResponse { result }
        })
        .method("Multiply", |_ctx, req: MultiplyRequest| async move {
            let result = req.a * req.b;
            println!("handling Multiply: {} * {} = {}", req.a, req.b, result);
            MultiplyResponse { result }
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let addr = "127.0.0.1:9000";
    println!("Calculator server listening on {addr}");

    peerwire::server::serve(addr, |peer: Arc<RpcPeer>| {
        peer.register_service("Calculator", calculator());

        // Symmetric RPC: greet the client over the same connection.
        tokio::spawn(async move {
            let response: Result<HelloResponse, RpcError> = peer
                .call(
                    "Greeter.Hello",
                    &HelloRequest {
                        from: "server".to_string(),
                    },
                )
                .await;
            match response {
                Ok(r) => println!("client answered greeting: {}", r.greeting),
                Err(e) => println!("greeting failed: {e}"),
            }
        });
    })
    .await?;

    Ok(())
}
