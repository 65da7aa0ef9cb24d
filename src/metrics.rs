/// Metrics and telemetry for the CarePath portal
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Booking outcomes
/// - Messages sent and live push delivery
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    /// Active HTTP requests
    pub static ref HTTP_REQUESTS_ACTIVE: IntGauge = register_int_gauge!(
        "http_requests_active",
        "Number of HTTP requests currently being processed"
    )
    .unwrap();

    // ========== Scheduling Metrics ==========

    /// Booking attempts by path and outcome
    pub static ref BOOKINGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "bookings_total",
        "Total number of booking attempts",
        &["policy", "outcome"]
    )
    .unwrap();

    /// Session status changes by target status
    pub static ref SESSION_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "session_transitions_total",
        "Total number of session status changes",
        &["status"]
    )
    .unwrap();

    // ========== Messaging Metrics ==========

    /// Messages persisted by sender kind
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        "messages_sent_total",
        "Total number of messages sent",
        &["sender_kind"]
    )
    .unwrap();

    /// Live pushes by outcome
    pub static ref PUSHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_pushes_total",
        "Total number of live push attempts",
        &["outcome"]
    )
    .unwrap();

    /// Open live connections
    pub static ref LIVE_CONNECTIONS: IntGauge = register_int_gauge!(
        "live_connections",
        "Number of open live messaging connections"
    )
    .unwrap();

    // ========== Account Metrics ==========

    /// Enrollments by role
    pub static ref ENROLLMENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "enrollments_total",
        "Total number of enrolled accounts",
        &["role"]
    )
    .unwrap();

    /// Login attempts by outcome
    pub static ref LOGINS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "logins_total",
        "Total number of login attempts",
        &["outcome"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a booking attempt
pub fn record_booking(policy: &str, outcome: &str) {
    BOOKINGS_TOTAL.with_label_values(&[policy, outcome]).inc();
}

/// Record a session status change
pub fn record_session_transition(status: &str) {
    SESSION_TRANSITIONS_TOTAL.with_label_values(&[status]).inc();
}

/// Record a persisted message
pub fn record_message_sent(sender_kind: &str) {
    MESSAGES_SENT_TOTAL.with_label_values(&[sender_kind]).inc();
}

/// Record a live push attempt
pub fn record_push(delivered: bool) {
    PUSHES_TOTAL
        .with_label_values(&[if delivered { "delivered" } else { "dropped" }])
        .inc();
}

/// Record an enrollment
pub fn record_enrollment(role: &str) {
    ENROLLMENTS_TOTAL.with_label_values(&[role]).inc();
}

/// Record a login attempt
pub fn record_login(success: bool) {
    LOGINS_TOTAL
        .with_label_values(&[if success { "success" } else { "failure" }])
        .inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}
