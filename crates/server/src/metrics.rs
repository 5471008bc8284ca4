//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the harvestline server:
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Run manager status (collected dynamically)
//!
//! Engine metrics (steps, downloads, watchdog) live in the core crate and are
//! registered here as well.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use harvestline_core::RunState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "harvestline_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvestline_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "harvestline_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "harvestline_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "harvestline_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvestline_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// WebSocket lag events (when client falls behind).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "harvestline_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Run Manager Metrics (collected dynamically)
// =============================================================================

/// Whether a pipeline run is active (1) or not (0).
pub static RUN_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "harvestline_run_active",
        "Whether a pipeline run is currently active",
    )
    .unwrap()
});

/// Runs recorded since startup that ended in failure.
pub static RUNS_FAILED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "harvestline_runs_failed",
        "Recorded runs that finished with errors",
    )
    .unwrap()
});

/// Enabled sessions in the loaded configuration.
pub static SESSIONS_ENABLED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "harvestline_sessions_enabled",
        "Number of enabled browser sessions",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // WebSocket
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();

    // Runs
    registry.register(Box::new(RUN_ACTIVE.clone())).unwrap();
    registry.register(Box::new(RUNS_FAILED.clone())).unwrap();
    registry
        .register(Box::new(SESSIONS_ENABLED.clone()))
        .unwrap();

    // Core metrics (scheduler, download loop, feed, watchdog)
    for metric in harvestline_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let runs = state.runs();
    RUN_ACTIVE.set(if runs.active_run().is_some() { 1 } else { 0 });
    let failed = runs
        .list_runs()
        .iter()
        .filter(|r| r.state == RunState::Failed)
        .count();
    RUNS_FAILED.set(failed as i64);
    SESSIONS_ENABLED.set(state.config().enabled_sessions().count() as i64);
}

static UUID_RE: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap()
});

static NUMERIC_RE: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_RE.replace_all(path, "{id}");
    let result = NUMERIC_RE.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/runs/550e8400-e29b-41d4-a716-446655440000/cancel";
        assert_eq!(normalize_path(path), "/api/v1/runs/{id}/cancel");
    }

    #[test]
    fn test_normalize_path_numeric() {
        let path = "/api/v1/runs/12345";
        assert_eq!(normalize_path(path), "/api/v1/runs/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        let path = "/api/v1/health";
        assert_eq!(normalize_path(path), "/api/v1/health");
    }

    #[test]
    fn test_registry_contains_server_and_core_metrics() {
        // Prometheus only outputs vectors that have been touched
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        RUN_ACTIVE.set(0);
        WS_CONNECTIONS_TOTAL.inc();
        harvestline_core::metrics::STEPS_TOTAL
            .with_label_values(&["success"])
            .inc();

        let output = encode_metrics();

        assert!(output.contains("# HELP"));
        assert!(output.contains("harvestline_http_requests_total"));
        assert!(output.contains("harvestline_run_active"));
        assert!(output.contains("harvestline_ws_connections_total"));
        assert!(output.contains("harvestline_steps_total"));
        assert!(output.contains("harvestline_watchdog_timeouts_total"));
    }
}
