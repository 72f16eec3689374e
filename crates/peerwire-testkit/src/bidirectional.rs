//! Bidirectional RPC scenario harness.
//!
//! Both peers on one connection can call each other; these scenarios cover
//! the patterns that matter there: plain echo, symmetric concurrent calls,
//! and a handler on one side calling back into the other mid-request.

use std::sync::Arc;

use peerwire_core::ServiceTable;
use serde::{Deserialize, Serialize};

use crate::{calculator_table, peer_pair, CalculatorClient, TestError};

/// Scenarios for bidirectional RPC testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidirectionalScenario {
    /// A calls B, B echoes back.
    SimpleEcho,

    /// Calculator on both peers; each calls the other concurrently.
    SymmetricCalls,

    /// A calls B; B's handler calls back into A before replying.
    NestedCallback,
}

/// Run a bidirectional RPC scenario, panicking on failure.
pub async fn run_bidirectional_scenario(scenario: BidirectionalScenario) {
    let result = match scenario {
        BidirectionalScenario::SimpleEcho => run_simple_echo().await,
        BidirectionalScenario::SymmetricCalls => run_symmetric_calls().await,
        BidirectionalScenario::NestedCallback => run_nested_callback().await,
    };

    if let Err(e) = result {
        panic!("bidirectional scenario {scenario:?} failed: {e}");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoRequest {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoResponse {
    text: String,
}

fn echo_table() -> ServiceTable {
    ServiceTable::new().method("Say", |_ctx, req: EchoRequest| async move {
        EchoResponse { text: req.text }
    })
}

async fn run_simple_echo() -> Result<(), TestError> {
    let (a, b) = peer_pair();
    b.register_service("Echo", echo_table());

    let response: EchoResponse = a
        .call(
            "Echo.Say",
            &EchoRequest {
                text: "hello".to_string(),
            },
        )
        .await?;

    if response.text != "hello" {
        return Err(TestError::Assertion(format!(
            "expected echo 'hello', got {:?}",
            response.text
        )));
    }

    a.close().await;
    b.close().await;
    Ok(())
}

async fn run_symmetric_calls() -> Result<(), TestError> {
    let (a, b) = peer_pair();
    a.register_service("Calculator", calculator_table());
    b.register_service("Calculator", calculator_table());

    // Both directions at once; neither call may stall the other.
    let client_a = CalculatorClient::new(Arc::clone(&a));
    let client_b = CalculatorClient::new(Arc::clone(&b));
    let (sum, product) = tokio::join!(client_a.add(7, 5), client_b.multiply(3, 4));

    let sum = sum?;
    let product = product?;
    if sum != 12 || product != 12 {
        return Err(TestError::Assertion(format!(
            "expected (12, 12), got ({sum}, {product})"
        )));
    }

    a.close().await;
    b.close().await;
    Ok(())
}

async fn run_nested_callback() -> Result<(), TestError> {
    let (a, b) = peer_pair();

    // A provides the prefix.
    a.register_service(
        "Prefix",
        ServiceTable::new().method("Get", |_ctx, _req: EchoRequest| async move {
            EchoResponse {
                text: "PREFIX:".to_string(),
            }
        }),
    );

    // B's handler calls back into A for the prefix before replying.
    let back_to_a = Arc::clone(&b);
    b.register_service(
        "Format",
        ServiceTable::new().method("Apply", move |_ctx, req: EchoRequest| {
            let peer = Arc::clone(&back_to_a);
            async move {
                let prefix: EchoResponse = match peer
                    .call(
                        "Prefix.Get",
                        &EchoRequest {
                            text: String::new(),
                        },
                    )
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        return EchoResponse {
                            text: format!("callback failed: {e}"),
                        };
                    }
                };
                EchoResponse {
                    text: format!("{}{}", prefix.text, req.text),
                }
            }
        }),
    );

    let response: EchoResponse = a
        .call(
            "Format.Apply",
            &EchoRequest {
                text: "test".to_string(),
            },
        )
        .await?;

    if response.text != "PREFIX:test" {
        return Err(TestError::Assertion(format!(
            "expected 'PREFIX:test', got {:?}",
            response.text
        )));
    }

    a.close().await;
    b.close().await;
    Ok(())
}
