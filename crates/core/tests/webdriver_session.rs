//! Session acquisition against a stub WebDriver endpoint.
//!
//! The stub speaks just enough of the protocol to attach, configure the
//! download directory and open the feed, and records every session it ends.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use harvestline_core::session::SessionFactory;
use harvestline_core::testing::{fixtures, MockFileSystem};
use harvestline_core::BrowserSessionFactory;

#[derive(Default)]
struct StubDriver {
    cdp_supported: bool,
    deleted: Mutex<Vec<String>>,
}

async fn new_session() -> Json<Value> {
    Json(json!({ "value": { "sessionId": "sess-1", "capabilities": {} } }))
}

async fn cdp_execute(State(stub): State<Arc<StubDriver>>) -> (StatusCode, Json<Value>) {
    if stub.cdp_supported {
        (StatusCode::OK, Json(json!({ "value": {} })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "value": { "error": "unknown command", "message": "cdp passthrough unavailable" }
            })),
        )
    }
}

async fn navigate() -> Json<Value> {
    Json(json!({ "value": null }))
}

async fn delete_session(
    State(stub): State<Arc<StubDriver>>,
    Path(id): Path<String>,
) -> Json<Value> {
    stub.deleted.lock().unwrap().push(id);
    Json(json!({ "value": null }))
}

async fn spawn_stub(cdp_supported: bool) -> (SocketAddr, Arc<StubDriver>) {
    let stub = Arc::new(StubDriver {
        cdp_supported,
        ..Default::default()
    });
    let app = Router::new()
        .route("/session", post(new_session))
        .route("/session/{id}", delete(delete_session))
        .route("/session/{id}/goog/cdp/execute", post(cdp_execute))
        .route("/session/{id}/url", post(navigate))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, stub)
}

fn factory(addr: SocketAddr) -> BrowserSessionFactory {
    let mut config = fixtures::config(vec![fixtures::session("s1", 9222, 1)]);
    config.webdriver.url = format!("http://{}", addr);
    BrowserSessionFactory::new(Arc::new(config), Arc::new(MockFileSystem::new()))
}

#[tokio::test]
async fn test_failed_setup_ends_driver_session() {
    let (addr, stub) = spawn_stub(false).await;
    let factory = factory(addr);
    let session = fixtures::session("s1", 9222, 1);

    let result = factory.open(&session).await;

    let Err(e) = result else {
        panic!("open should fail without download directory support");
    };
    assert!(format!("{:#}", e).contains("configure download directory"));
    assert_eq!(*stub.deleted.lock().unwrap(), vec!["sess-1".to_string()]);

    // Nothing is left for close to release.
    factory.close("s1").await;
    assert_eq!(stub.deleted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_opened_session_released_on_close() {
    let (addr, stub) = spawn_stub(true).await;
    let factory = factory(addr);
    let session = fixtures::session("s1", 9222, 1);

    assert!(factory.open(&session).await.is_ok());
    assert!(stub.deleted.lock().unwrap().is_empty());

    factory.close("s1").await;
    assert_eq!(*stub.deleted.lock().unwrap(), vec!["sess-1".to_string()]);
}
