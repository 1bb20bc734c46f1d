use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests. Labels: method, path, status.
pub const REQUESTS_TOTAL: &str = "bookd_requests_total";

/// Histogram: request latency in seconds. Labels: path.
pub const REQUEST_DURATION_SECONDS: &str = "bookd_request_duration_seconds";

/// Counter: reservations committed. Labels: resource (room|car).
pub const BOOKINGS_TOTAL: &str = "bookd_bookings_total";

/// Counter: bookings rejected by the conflict detector. Labels: resource.
pub const BOOKING_CONFLICTS_TOTAL: &str = "bookd_booking_conflicts_total";

/// Counter: car returns completed.
pub const CAR_RETURNS_TOTAL: &str = "bookd_car_returns_total";

/// Counter: failed login attempts.
pub const AUTH_FAILURES_TOTAL: &str = "bookd_auth_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
