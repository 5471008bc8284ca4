//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Scheduler (step outcomes)
//! - Download loop (items saved, iteration failures, acquisition time)
//! - Feed navigation
//! - Watchdog (timeouts, escalations)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Scheduler Metrics
// =============================================================================

/// Steps finished, by terminal status.
pub static STEPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvestline_steps_total", "Pipeline steps by terminal status"),
        &["status"], // "success", "error", "skipped"
    )
    .unwrap()
});

/// Pipeline runs finished, by aggregate status.
pub static RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvestline_runs_total", "Pipeline runs by aggregate status"),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Download Loop Metrics
// =============================================================================

/// Items saved to disk.
pub static ITEMS_DOWNLOADED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "harvestline_items_downloaded_total",
            "Total feed items exported and saved",
        ),
        &["session"],
    )
    .unwrap()
});

/// Recoverable iteration failures, by kind.
pub static ITERATION_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "harvestline_iteration_failures_total",
            "Download loop iterations that failed and triggered recovery",
        ),
        &["kind"], // "readiness_timeout", "export_trigger_not_found", ...
    )
    .unwrap()
});

/// Time from export trigger to saved file.
pub static ITEM_ACQUISITION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "harvestline_item_acquisition_seconds",
            "Duration from export trigger to saved file",
        )
        .buckets(vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &[],
    )
    .unwrap()
});

/// Download loops terminated by a setup failure.
pub static LOOP_SETUP_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "harvestline_loop_setup_failures_total",
        "Download loops aborted because the first item could not be opened",
    )
    .unwrap()
});

// =============================================================================
// Feed Navigation Metrics
// =============================================================================

/// Feed advance attempts, by result.
pub static FEED_ADVANCES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvestline_feed_advances_total", "Feed advance attempts"),
        &["result"], // "moved", "stuck"
    )
    .unwrap()
});

// =============================================================================
// Watchdog Metrics
// =============================================================================

/// Missed heartbeat periods.
pub static WATCHDOG_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "harvestline_watchdog_timeouts_total",
        "Watchdog timeouts (missed heartbeat periods)",
    )
    .unwrap()
});

/// Runs cancelled by the watchdog.
pub static WATCHDOG_ESCALATIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "harvestline_watchdog_escalations_total",
        "Runs cancelled after reaching the escalation threshold",
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Scheduler
        Box::new(STEPS_TOTAL.clone()),
        Box::new(RUNS_TOTAL.clone()),
        // Download loop
        Box::new(ITEMS_DOWNLOADED.clone()),
        Box::new(ITERATION_FAILURES.clone()),
        Box::new(ITEM_ACQUISITION_DURATION.clone()),
        Box::new(LOOP_SETUP_FAILURES.clone()),
        // Feed
        Box::new(FEED_ADVANCES.clone()),
        // Watchdog
        Box::new(WATCHDOG_TIMEOUTS.clone()),
        Box::new(WATCHDOG_ESCALATIONS.clone()),
    ]
}
