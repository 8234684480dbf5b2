use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::{info, warn};

// ── Metric names ─────────────────────────────────────────────────

/// Counter, label `op`: requests processed, by operation.
pub const REQUESTS_TOTAL: &str = "slotd_requests_total";
/// Histogram, label `op`: request handling latency.
pub const REQUEST_DURATION_SECONDS: &str = "slotd_request_duration_seconds";
/// Counter, label `reason`: requests refused, by rejection label.
pub const REQUESTS_REJECTED_TOTAL: &str = "slotd_requests_rejected_total";

/// Gauge: currently open client connections.
pub const CONNECTIONS_ACTIVE: &str = "slotd_connections_active";
/// Counter: connections accepted since start.
pub const CONNECTIONS_TOTAL: &str = "slotd_connections_total";
/// Counter: connections turned away at the cap.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotd_connections_rejected_total";

/// Gauge: soft locks currently held.
pub const SOFT_LOCKS_ACTIVE: &str = "slotd_soft_locks_active";
/// Counter: soft locks reclaimed by the TTL sweep.
pub const LOCKS_EXPIRED_TOTAL: &str = "slotd_locks_expired_total";
/// Counter: commits refused for overlapping an existing booking.
pub const COMMIT_CONFLICTS_TOTAL: &str = "slotd_commit_conflicts_total";

/// Histogram: events per group-commit WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";
/// Histogram: group-commit flush + fsync latency.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Install the Prometheus recorder, serving /metrics on `port` if set.
/// Failure to bind is logged and tolerated — the server runs without
/// metrics rather than refusing to start.
pub fn init(port: Option<u16>) {
    let Some(port) = port else {
        info!("metrics exporter disabled (no port configured)");
        return;
    };
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!(%addr, "metrics exporter listening"),
        Err(e) => warn!(%addr, error = %e, "failed to start metrics exporter"),
    }
}
