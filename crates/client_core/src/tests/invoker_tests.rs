use super::*;
use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
};

fn sample_request() -> InvocationRequest {
    InvocationRequest::new(
        "0x9aEB5A6128465b989969F95eC4Bfc55d07604393",
        json!([
            {
                "inputs": [{"name": "password", "type": "string"}],
                "name": "openGates",
                "outputs": [],
                "stateMutability": "nonpayable",
                "type": "function"
            }
        ]),
        "openGates",
        vec![json!("mellon")],
        0,
        0,
        1,
    )
    .unwrap()
}

async fn spawn_executor(router: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Clone)]
struct CaptureState {
    tx: Arc<Mutex<Option<oneshot::Sender<Value>>>>,
}

async fn handle_execute_ok(
    State(state): State<CaptureState>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    if let Some(tx) = state.tx.lock().await.take() {
        let _ = tx.send(payload);
    }
    Json(json!({"tx_hash": "0xdeadbeef"}))
}

#[tokio::test]
async fn successful_invocation_returns_receipt_and_posts_the_request() {
    let (tx, rx) = oneshot::channel();
    let state = CaptureState {
        tx: Arc::new(Mutex::new(Some(tx))),
    };
    let router = Router::new()
        .route("/contract/execute", post(handle_execute_ok))
        .with_state(state);
    let base = spawn_executor(router).await;

    let invoker = HttpContractInvoker::new(&base).unwrap();
    let receipt = invoker.invoke(&sample_request()).await.unwrap();
    assert_eq!(receipt.tx_hash, "0xdeadbeef");

    let posted = rx.await.unwrap();
    assert_eq!(posted["function_name"], "openGates");
    assert_eq!(posted["arguments"], json!(["mellon"]));
    assert_eq!(posted["gas_price"], 1);
}

#[tokio::test]
async fn executor_signing_failure_maps_into_the_taxonomy() {
    let router = Router::new().route(
        "/contract/execute",
        post(|| async {
            (
                axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"kind": "signing", "message": "wallet locked"})),
            )
        }),
    );
    let base = spawn_executor(router).await;

    let invoker = HttpContractInvoker::new(&base).unwrap();
    let err = invoker.invoke(&sample_request()).await.unwrap_err();
    let InvocationError::Signing(message) = err else {
        panic!("expected signing error, got {err:?}");
    };
    assert_eq!(message, "wallet locked");
}

#[tokio::test]
async fn server_error_without_kind_is_transport() {
    let router = Router::new().route(
        "/contract/execute",
        post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let base = spawn_executor(router).await;

    let invoker = HttpContractInvoker::new(&base).unwrap();
    let err = invoker.invoke(&sample_request()).await.unwrap_err();
    assert!(matches!(err, InvocationError::Transport(_)));
}

#[tokio::test]
async fn connection_refused_is_a_transport_error() {
    // Bind and immediately drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let invoker = HttpContractInvoker::new(&format!("http://{addr}")).unwrap();
    let err = invoker.invoke(&sample_request()).await.unwrap_err();
    assert!(matches!(err, InvocationError::Transport(_)));
}

#[tokio::test]
async fn invalid_executor_url_is_rejected_up_front() {
    let err = HttpContractInvoker::new("not a url").unwrap_err();
    assert!(matches!(err, InvocationError::Validation(_)));
}

#[tokio::test]
async fn missing_invoker_always_fails_with_transport() {
    let err = MissingContractInvoker
        .invoke(&sample_request())
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::Transport(_)));
}
