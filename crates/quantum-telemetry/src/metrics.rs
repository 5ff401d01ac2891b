//! Prometheus metrics for Quantum-Chain subsystems.
//!
//! All metrics follow the naming convention: `qc_<subsystem>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., requests_sent_total)
//! - **Gauge**: Value that can go up or down (e.g., pending_calls)
//! - **Histogram**: Distribution of values (e.g., call_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // REWARD CALCULATOR IPC METRICS (Subsystem 18)
    // =========================================================================

    /// Requests written to the reward calculator socket
    pub static ref RC_REQUESTS_SENT: CounterVec = CounterVec::new(
        Opts::new("qc_rc_requests_sent_total", "Requests sent to the reward calculator"),
        &["kind"]
    ).expect("metric creation failed");

    /// Responses matched to a pending call
    pub static ref RC_RESPONSES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("qc_rc_responses_received_total", "Responses received from the reward calculator"),
        &["kind"]
    ).expect("metric creation failed");

    /// Calls that hit their timeout
    pub static ref RC_REQUEST_TIMEOUTS: CounterVec = CounterVec::new(
        Opts::new("qc_rc_request_timeouts_total", "Reward calculator calls that timed out"),
        &["kind"]
    ).expect("metric creation failed");

    /// Responses without a pending call (late or unknown msg_id)
    pub static ref RC_UNMATCHED_RESPONSES: Counter = Counter::new(
        "qc_rc_unmatched_responses_total",
        "Responses discarded because no pending call matched their msg_id"
    ).expect("metric creation failed");

    /// Notifications (READY, CALCULATE_DONE) received
    pub static ref RC_NOTIFICATIONS: CounterVec = CounterVec::new(
        Opts::new("qc_rc_notifications_total", "Notifications received from the reward calculator"),
        &["kind"]
    ).expect("metric creation failed");

    /// Outstanding pending calls
    pub static ref RC_PENDING_CALLS: Gauge = Gauge::new(
        "qc_rc_pending_calls",
        "Requests awaiting a response from the reward calculator"
    ).expect("metric creation failed");

    /// Round-trip time of reward calculator calls
    pub static ref RC_CALL_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "qc_rc_call_duration_seconds",
            "Time between sending a request and receiving its response"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).unwrap()),
        &["kind"]
    ).expect("metric creation failed");

    // =========================================================================
    // REWARD CALCULATOR DATA LOG METRICS (Subsystem 18)
    // =========================================================================

    /// Records appended to the current data log
    pub static ref RC_DATA_LOG_RECORDS: CounterVec = CounterVec::new(
        Opts::new("qc_rc_data_log_records_total", "Records appended to the reward calculation data log"),
        &["record"]
    ).expect("metric creation failed");

    /// Data log rotations into sealed snapshots
    pub static ref RC_DATA_LOG_ROTATIONS: Counter = Counter::new(
        "qc_rc_data_log_rotations_total",
        "Data log rotations into calculation snapshots"
    ).expect("metric creation failed");

    /// Data log batch flush duration
    pub static ref RC_DATA_LOG_FLUSH_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "qc_rc_data_log_flush_duration_seconds",
            "Time spent flushing one block's records"
        ).buckets(exponential_buckets(0.0001, 2.0, 12).unwrap())
    ).expect("metric creation failed");

    /// Sealed snapshots deleted after a finished calculation
    pub static ref RC_SNAPSHOTS_REMOVED: Counter = Counter::new(
        "qc_rc_snapshots_removed_total",
        "Calculation snapshots removed after CALCULATE_DONE"
    ).expect("metric creation failed");

    /// Blocks reported to the reward calculator via COMMIT_BLOCK
    pub static ref RC_BLOCKS_COMMITTED: Counter = Counter::new(
        "qc_rc_blocks_committed_total",
        "Blocks committed to the reward calculator"
    ).expect("metric creation failed");

    /// Height of the last block committed to the reward calculator
    pub static ref RC_LAST_COMMITTED_HEIGHT: Gauge = Gauge::new(
        "qc_rc_last_committed_height",
        "Height of the last block acknowledged by the reward calculator"
    ).expect("metric creation failed");

    // =========================================================================
    // ERROR METRICS
    // =========================================================================

    /// Subsystem errors by type
    pub static ref SUBSYSTEM_ERRORS: CounterVec = CounterVec::new(
        Opts::new("qc_subsystem_errors_total", "Errors by subsystem and type"),
        &["subsystem", "error_type"]
    ).expect("metric creation failed");
}

/// Handle for the metrics registry
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // IPC
        Box::new(RC_REQUESTS_SENT.clone()),
        Box::new(RC_RESPONSES_RECEIVED.clone()),
        Box::new(RC_REQUEST_TIMEOUTS.clone()),
        Box::new(RC_UNMATCHED_RESPONSES.clone()),
        Box::new(RC_NOTIFICATIONS.clone()),
        Box::new(RC_PENDING_CALLS.clone()),
        Box::new(RC_CALL_DURATION.clone()),
        // Data log
        Box::new(RC_DATA_LOG_RECORDS.clone()),
        Box::new(RC_DATA_LOG_ROTATIONS.clone()),
        Box::new(RC_DATA_LOG_FLUSH_DURATION.clone()),
        Box::new(RC_SNAPSHOTS_REMOVED.clone()),
        Box::new(RC_BLOCKS_COMMITTED.clone()),
        Box::new(RC_LAST_COMMITTED_HEIGHT.clone()),
        // Errors
        Box::new(SUBSYSTEM_ERRORS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Current values of every registered metric in the Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let mut out = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut out)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(out).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Time the rest of the scope into `$histogram`; observed when the guard drops.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $histogram.start_timer()
    };
}
