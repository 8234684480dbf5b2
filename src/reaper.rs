use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::coordinator::ReservationCoordinator;
use crate::validate;

/// Periodically reclaim soft locks whose TTL has lapsed. Runs for the
/// lifetime of the server; expiry is announced by the coordinator the
/// same way an explicit release is.
pub async fn run_reaper(coordinator: Arc<ReservationCoordinator>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let swept = coordinator.expire_stale_locks(validate::now_ms());
        if swept > 0 {
            info!(swept, "reclaimed stale soft locks");
        }
    }
}
