//! In-process API tests against scripted sessions.

mod common;

use axum::http::StatusCode;
use std::time::Duration;

use common::{fixtures, TestFixture};

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_includes_sessions_and_hash() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/config").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["hash"], "0123456789abcdef");
    assert_eq!(response.body["sessions"][0]["id"], "s1");
    assert_eq!(response.body["sessions"][1]["debug_port"], 9223);
    assert_eq!(response.body["scheduler"]["max_parallel"], 1);
}

#[tokio::test]
async fn test_run_lifecycle() {
    let fixture = TestFixture::new().await;

    let response = fixture.post("/api/v1/runs").await;
    assert_status!(response, StatusCode::ACCEPTED);
    let id = response.body["id"].as_str().unwrap().to_string();

    let finished = fixture.wait_for_run(&id).await;
    assert_status!(finished, StatusCode::OK);
    assert_eq!(finished.body["state"], "succeeded");

    let steps = finished.body["steps"].as_array().unwrap();
    let ids: Vec<&str> = steps.iter().map(|s| s["step_id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["open_all", "download:s1", "download:s2"]);
    assert!(steps.iter().all(|s| s["status"] == "success"));
    assert_eq!(finished.body["report"]["status"], "success");

    assert_eq!(fixture.saved_files("/downloads/s1"), 1);
    assert_eq!(fixture.saved_files("/downloads/s2"), 1);
    assert_eq!(fixture.factory.closed().await.len(), 2);

    let list = fixture.get("/api/v1/runs").await;
    assert_eq!(list.body["runs"].as_array().unwrap().len(), 1);
    assert!(list.body["active"].is_null());
}

#[tokio::test]
async fn test_one_failing_session_fails_run_but_not_others() {
    let fixture = TestFixture::new().await;
    fixture.drivers[0].fail_open();

    let response = fixture.post("/api/v1/runs").await;
    let id = response.body["id"].as_str().unwrap().to_string();
    let finished = fixture.wait_for_run(&id).await;

    assert_eq!(finished.body["state"], "failed");
    let steps = finished.body["steps"].as_array().unwrap();
    assert_eq!(steps[1]["status"], "error");
    assert_eq!(steps[2]["status"], "success");
}

#[tokio::test]
async fn test_second_start_conflicts_while_running() {
    let fixture = TestFixture::new().await;
    fixture.drivers[0].set_ready_delay(Duration::from_millis(500));

    let first = fixture.post("/api/v1/runs").await;
    assert_status!(first, StatusCode::ACCEPTED);

    let second = fixture.post("/api/v1/runs").await;
    assert_status!(second, StatusCode::CONFLICT);
    assert!(second.body["error"].as_str().unwrap().contains("still active"));

    let id = first.body["id"].as_str().unwrap().to_string();
    fixture.wait_for_run(&id).await;
}

#[tokio::test]
async fn test_cancel_run() {
    let fixture = TestFixture::with_config(fixtures::config(vec![
        fixtures::session("s1", 9222, 10),
        fixtures::session("s2", 9223, 1),
    ]))
    .await;
    fixture.drivers[0].set_ready_delay(Duration::from_millis(200));

    let response = fixture.post("/api/v1/runs").await;
    let id = response.body["id"].as_str().unwrap().to_string();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let cancel = fixture.post(&format!("/api/v1/runs/{}/cancel", id)).await;
    assert_status!(cancel, StatusCode::ACCEPTED);

    let finished = fixture.wait_for_run(&id).await;
    assert_eq!(finished.body["state"], "cancelled");
    assert_eq!(finished.body["steps"][2]["status"], "skipped");
    assert!(fixture.drivers[0].export_count() < 10);

    let again = fixture.post(&format!("/api/v1/runs/{}/cancel", id)).await;
    assert_status!(again, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let fixture = TestFixture::new().await;
    let path = "/api/v1/runs/550e8400-e29b-41d4-a716-446655440000";

    assert_status!(fixture.get(path).await, StatusCode::NOT_FOUND);
    assert_status!(
        fixture.post(&format!("{}/cancel", path)).await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_invalid_run_id_is_bad_request() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/runs/not-a-uuid").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_port_rejected_before_start() {
    let mut second = fixtures::session("s2", 9222, 1);
    second.download_dir = "/downloads/s2".into();
    let fixture =
        TestFixture::with_config(fixtures::config(vec![fixtures::session("s1", 9222, 1), second]))
            .await;

    let response = fixture.post("/api/v1/runs").await;

    assert_status!(response, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("debugging port 9222"));
    assert!(fixture.factory.opened().await.is_empty());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_text("/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("harvestline_http_requests_total"));
    assert!(body.contains("harvestline_sessions_enabled 2"));
}
