//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process router
//! with scripted sessions injected, so runs can be driven end to end
//! without a browser.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use harvestline_core::testing::{MockFileSystem, MockSessionFactory, ScriptedDriver};
use harvestline_core::{Config, RunManager, SessionPipeline, WatchdogRegistry};

/// Re-export fixtures for test convenience
pub use harvestline_core::testing::fixtures;

/// Test fixture with one scripted driver per configured session.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_start_run() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/runs").await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// In-memory filesystem shared by all drivers
    pub fs: MockFileSystem,
    /// Scripted drivers, in session order
    pub drivers: Vec<Arc<ScriptedDriver>>,
    /// Records opened and closed sessions
    pub factory: Arc<MockSessionFactory>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Two enabled sessions, one item each.
    pub async fn new() -> Self {
        Self::with_config(fixtures::config(vec![
            fixtures::session("s1", 9222, 1),
            fixtures::session("s2", 9223, 1),
        ]))
        .await
    }

    /// Create a test fixture for a custom configuration.
    pub async fn with_config(config: Config) -> Self {
        let fs = MockFileSystem::new();
        let factory = Arc::new(MockSessionFactory::new());

        let mut drivers = Vec::new();
        for session in &config.sessions {
            fs.add_dir(session.download_dir.clone());
            let driver = Arc::new(ScriptedDriver::new(
                fs.clone(),
                session.download_dir.clone(),
            ));
            factory.add(&session.id, driver.clone()).await;
            drivers.push(driver);
        }

        let pipeline = SessionPipeline::new(
            Arc::new(config),
            factory.clone(),
            Arc::new(fs.clone()),
            WatchdogRegistry::new(),
        );
        let state = Arc::new(harvestline_server::state::AppState::new(
            RunManager::new(pipeline),
            "0123456789abcdef".to_string(),
        ));

        let router = harvestline_server::api::create_router(state);

        Self {
            router,
            fs,
            drivers,
            factory,
        }
    }

    /// Send a GET request to the test router.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path).await
    }

    /// Send a POST request without a body.
    pub async fn post(&self, path: &str) -> TestResponse {
        self.request("POST", path).await
    }

    /// Poll a run until it leaves the `running` state.
    pub async fn wait_for_run(&self, id: &str) -> TestResponse {
        let path = format!("/api/v1/runs/{}", id);
        for _ in 0..200 {
            let response = self.get(&path).await;
            if response.body["state"] != "running" {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("run {} did not finish in time", id);
    }

    /// Saved files in a session's download directory.
    pub fn saved_files(&self, dir: &str) -> usize {
        self.fs.files_in(Path::new(dir)).len()
    }

    /// Send a request and return the status and text body.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send a request to the test router.
    async fn request(&self, method: &str, path: &str) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
