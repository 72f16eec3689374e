//! End-to-end calls between two in-memory peers.

use std::sync::Arc;
use std::time::Duration;

use peerwire::{ErrorCode, PeerOptions, RpcError, ServiceTable, Session};
use peerwire_testkit::{
    calculator_table, peer_pair, peer_pair_with_options, short_timeout_options, sleeper_table,
    AddRequest, AddResponse, CalculatorClient, MultiplyRequest, MultiplyResponse, NapRequest,
    NapResponse,
};
use serde::{Deserialize, Serialize};

#[tokio::test]
async fn add_round_trip() {
    let (a, b) = peer_pair();
    b.register_service("Calculator", calculator_table());

    let response: AddResponse = a
        .call("Calculator.Add", &AddRequest { a: 7, b: 5 })
        .await
        .unwrap();
    assert_eq!(response.result, 12);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn symmetric_calls_complete_concurrently() {
    let (a, b) = peer_pair();
    a.register_service("Calculator", calculator_table());
    b.register_service("Calculator", calculator_table());

    let client_a = CalculatorClient::new(Arc::clone(&a));
    let client_b = CalculatorClient::new(Arc::clone(&b));

    let (sum, product) = tokio::join!(client_a.add(7, 5), client_b.multiply(3, 4));
    assert_eq!(sum.unwrap(), 12);
    assert_eq!(product.unwrap(), 12);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn unknown_method_is_a_remote_error_and_peer_stays_open() {
    let (a, b) = peer_pair();
    b.register_service("Calculator", calculator_table());

    let err = a
        .call::<_, AddResponse>("Calculator.Divide", &AddRequest { a: 6, b: 2 })
        .await
        .unwrap_err();
    match err {
        RpcError::Remote { code, message } => {
            assert_eq!(code, ErrorCode::MethodNotFound);
            assert!(message.contains("Divide"), "message was {message:?}");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    // The connection survives framework-level errors.
    let response: AddResponse = a
        .call("Calculator.Add", &AddRequest { a: 6, b: 2 })
        .await
        .unwrap();
    assert_eq!(response.result, 8);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn unknown_service_is_a_remote_error() {
    let (a, b) = peer_pair();
    b.register_service("Calculator", calculator_table());

    let err = a
        .call::<_, AddResponse>("Missing.Add", &AddRequest { a: 1, b: 1 })
        .await
        .unwrap_err();
    match err {
        RpcError::Remote { code, message } => {
            assert_eq!(code, ErrorCode::MethodNotFound);
            assert!(message.contains("Missing"), "message was {message:?}");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn method_name_without_dot_is_invalid_request() {
    let (a, b) = peer_pair();
    b.register_service("Calculator", calculator_table());

    let err = a
        .call::<_, AddResponse>("NoDot", &AddRequest { a: 1, b: 1 })
        .await
        .unwrap_err();
    match err {
        RpcError::Remote { code, .. } => assert_eq!(code, ErrorCode::InvalidRequest),
        other => panic!("expected remote error, got {other:?}"),
    }

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn empty_method_parts_are_invalid_requests() {
    let (a, b) = peer_pair();
    b.register_service("Calculator", calculator_table());

    for method in ["Calculator.", ".Add"] {
        let err = a
            .call::<_, AddResponse>(method, &AddRequest { a: 1, b: 1 })
            .await
            .unwrap_err();
        match err {
            RpcError::Remote { code, .. } => assert_eq!(code, ErrorCode::InvalidRequest),
            other => panic!("method {method:?}: expected remote error, got {other:?}"),
        }
    }

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn slow_handler_times_out_and_late_response_is_dropped() {
    let (a, b) = peer_pair_with_options(
        short_timeout_options(Duration::from_millis(100)),
        PeerOptions::default(),
    );
    b.register_service("Sleeper", sleeper_table());
    b.register_service("Calculator", calculator_table());

    let err = a
        .call::<_, NapResponse>("Sleeper.Nap", &NapRequest { millis: 400 })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout), "got {err:?}");

    // Let the stale response arrive; it must be dropped silently.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let response: AddResponse = a
        .call("Calculator.Add", &AddRequest { a: 2, b: 3 })
        .await
        .unwrap();
    assert_eq!(response.result, 5);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn re_registration_replaces_the_handler_table() {
    let (a, b) = peer_pair();
    b.register_service("Calculator", calculator_table());

    let response: AddResponse = a
        .call("Calculator.Add", &AddRequest { a: 2, b: 2 })
        .await
        .unwrap();
    assert_eq!(response.result, 4);

    // Replace Add with a subtracting impostor.
    b.register_service(
        "Calculator",
        ServiceTable::new().method("Add", |_ctx, req: AddRequest| async move {
            AddResponse {
                result: req.a - req.b,
            }
        }),
    );

    let response: AddResponse = a
        .call("Calculator.Add", &AddRequest { a: 2, b: 2 })
        .await
        .unwrap();
    assert_eq!(response.result, 0);

    // Multiply was not carried over by the replacement table.
    let err = a
        .call::<_, MultiplyResponse>("Calculator.Multiply", &MultiplyRequest { a: 2, b: 2 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpcError::Remote {
            code: ErrorCode::MethodNotFound,
            ..
        }
    ));

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn panicking_handler_surfaces_internal_error_and_peer_survives() {
    let (a, b) = peer_pair();
    b.register_service(
        "Flaky",
        ServiceTable::new().method("Boom", |_ctx, _req: AddRequest| async move {
            if true {
                panic!("handler exploded");
            }
            AddResponse { result: 0 }
        }),
    );
    b.register_service("Calculator", calculator_table());

    let err = a
        .call::<_, AddResponse>("Flaky.Boom", &AddRequest { a: 1, b: 1 })
        .await
        .unwrap_err();
    match err {
        RpcError::Remote { code, message } => {
            assert_eq!(code, ErrorCode::InternalError);
            assert!(message.contains("panic"), "message was {message:?}");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    let response: AddResponse = a
        .call("Calculator.Add", &AddRequest { a: 1, b: 1 })
        .await
        .unwrap();
    assert_eq!(response.result, 2);

    a.close().await;
    b.close().await;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WhoAmIRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WhoAmIResponse {
    user: String,
}

#[derive(Debug, Clone)]
struct CurrentUser(String);

#[tokio::test]
async fn handlers_see_the_externally_supplied_session() {
    let session = Arc::new(Session::new());
    session.set(CurrentUser("ada".to_string()));

    let (a, b) = peer_pair_with_options(
        PeerOptions::default(),
        PeerOptions {
            session: Some(Arc::clone(&session)),
            ..PeerOptions::default()
        },
    );

    b.register_service(
        "Auth",
        ServiceTable::new().method("WhoAmI", |ctx, _req: WhoAmIRequest| async move {
            let user = ctx
                .session()
                .get::<CurrentUser>()
                .map(|u| u.0)
                .unwrap_or_else(|| "anonymous".to_string());
            WhoAmIResponse { user }
        }),
    );

    let response: WhoAmIResponse = a.call("Auth.WhoAmI", &WhoAmIRequest {}).await.unwrap();
    assert_eq!(response.user, "ada");

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn calls_in_both_directions_under_load() {
    let (a, b) = peer_pair();
    a.register_service("Calculator", calculator_table());
    b.register_service("Calculator", calculator_table());

    let mut tasks = Vec::new();
    for i in 0..100i32 {
        let peer = if i % 2 == 0 {
            Arc::clone(&a)
        } else {
            Arc::clone(&b)
        };
        tasks.push(tokio::spawn(async move {
            let response: AddResponse = peer
                .call("Calculator.Add", &AddRequest { a: i, b: i })
                .await
                .expect("call failed");
            assert_eq!(response.result, i * 2);
        }));
    }
    for task in tasks {
        task.await.expect("task panicked");
    }

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn replaced_peer_reference_is_not_required_for_dispatch() {
    // Dispatch only needs the peer to be alive, not externally referenced:
    // handlers registered up-front keep serving while callers hold clones.
    let (a, b) = peer_pair();
    b.register_service("Calculator", calculator_table());
    let client = CalculatorClient::new(Arc::clone(&a));
    drop(a);

    assert_eq!(client.add(20, 22).await.unwrap(), 42);
    b.close().await;
}
