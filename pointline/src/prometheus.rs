// prometheus exporter setup

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

pub const PAYLOADS_RECEIVED_TOTAL: &str = "pointline_payloads_received_total";
pub const PAYLOAD_SIZE_BYTES: &str = "pointline_payload_size_bytes";
pub const POINTS_RECEIVED_TOTAL: &str = "pointline_points_received_total";
pub const POINTS_REPORTED_TOTAL: &str = "pointline_points_reported_total";
pub const BLOCKED_TOTAL: &str = "pointline_blocked_total";
pub const TRANSPORT_ERRORS_TOTAL: &str = "pointline_transport_errors_total";
pub const CONNECTIONS_TOTAL: &str = "pointline_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "pointline_connections_active";

pub fn report_payload(size: usize) {
    counter!(PAYLOADS_RECEIVED_TOTAL).increment(1);
    histogram!(PAYLOAD_SIZE_BYTES).record(size as f64);
}

pub fn report_received_points(quantity: u64) {
    counter!(POINTS_RECEIVED_TOTAL).increment(quantity);
}

pub fn report_reported(quantity: u64) {
    counter!(POINTS_REPORTED_TOTAL).increment(quantity);
}

pub fn report_blocked(cause: &'static str, quantity: u64) {
    counter!(BLOCKED_TOTAL, "cause" => cause).increment(quantity);
}

pub fn report_transport_error(kind: &'static str) {
    counter!(TRANSPORT_ERRORS_TOTAL, "kind" => kind).increment(1);
}

pub fn report_connection_opened() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn report_connection_closed() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const PAYLOAD_SIZES: &[f64] = &[
        64.0,      // a single short line
        256.0,
        1024.0,    // 1KB
        4096.0,
        16384.0,
        32768.0,   // default max line length
        // backend will include Inf+ bucket
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(PAYLOAD_SIZE_BYTES.to_string()), PAYLOAD_SIZES)?
        .install_recorder()
}
