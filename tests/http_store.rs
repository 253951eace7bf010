mod common;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use common::{FakeRadio, Journal};
use meshrelay::error::StoreError;
use meshrelay::relay::{MessageStore, NodeScope, QueuePoller};
use meshrelay::store::HttpStore;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

#[derive(Clone, Default)]
struct MockStore {
    records: Arc<Mutex<Vec<Value>>>,
    puts: Arc<Mutex<Vec<Value>>>,
}

async fn list(State(s): State<MockStore>) -> Json<Vec<Value>> {
    Json(s.records.lock().unwrap().clone())
}

async fn ack(State(s): State<MockStore>, Json(body): Json<Value>) -> StatusCode {
    s.puts.lock().unwrap().push(body.clone());
    let id = body["id"].as_str().unwrap_or_default().to_string();
    for r in s.records.lock().unwrap().iter_mut() {
        if r["_id"] == id.as_str() {
            r["messageSent"] = json!(true);
        }
    }
    StatusCode::OK
}

async fn broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn created() -> StatusCode {
    StatusCode::CREATED
}

async fn serve(state: MockStore) -> String {
    let app = Router::new()
        .route("/api/sms", get(list).put(ack))
        .route("/api/broken", get(broken))
        .route("/api/created", put(created))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn store(base: &str, api: &str, ack: &str) -> HttpStore {
    HttpStore::new(
        format!("{}{}", base, api),
        format!("{}{}", base, ack),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn fetch_accepts_string_and_numeric_node_ids() {
    let state = MockStore::default();
    *state.records.lock().unwrap() = vec![
        json!({"_id": "a1", "node_id": "42", "message": "hi", "messageSent": false}),
        json!({"_id": "a2", "node_id": 7, "message": "yo"}),
    ];
    let base = serve(state).await;

    let pending = store(&base, "/api/sms", "/api/sms")
        .fetch_pending()
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].node_id, "42");
    assert_eq!(pending[1].node_id, "7");
    assert!(!pending[1].message_sent);
}

#[tokio::test]
async fn delivered_message_is_acknowledged_and_not_resent() {
    let state = MockStore::default();
    *state.records.lock().unwrap() = vec![json!({
        "_id": "a1", "node_id": "42", "message": "hi", "messageSent": false
    })];
    let base = serve(state.clone()).await;

    let journal = Journal::default();
    let radio = FakeRadio::new(&journal);
    let mut link = radio.link();
    let poller = QueuePoller::new(
        Box::new(store(&base, "/api/sms", "/api/sms")),
        NodeScope::all(),
    );

    let first = poller.poll(&mut link).await;
    assert_eq!(first.acknowledged, 1);
    assert_eq!(*state.puts.lock().unwrap(), vec![json!({"id": "a1"})]);

    let second = poller.poll(&mut link).await;
    assert_eq!(second.already_sent, 1);
    assert_eq!(radio.sent(), vec![(42, "hi".to_string())]);
    assert_eq!(state.puts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn non_200_fetch_is_an_error() {
    let base = serve(MockStore::default()).await;
    let err = store(&base, "/api/broken", "/api/sms")
        .fetch_pending()
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Status { status: 500, .. }));
}

#[tokio::test]
async fn ack_requires_exactly_200() {
    let base = serve(MockStore::default()).await;
    let err = store(&base, "/api/sms", "/api/created")
        .acknowledge("a1")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Status { status: 201, .. }));
}

#[tokio::test]
async fn unreachable_store_is_an_http_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = store(&format!("http://{}", addr), "/api/sms", "/api/sms")
        .fetch_pending()
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Http(_)));
}
