use crate::error::Rejected;
use crate::model::{BookingId, Calendar, Ms, TimeInterval};

/// Tolerance for client/server clock skew when rejecting past starts.
pub const GRACE_MS: Ms = 60_000;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as Ms
}

/// The single source of truth for "do these ranges conflict".
///
/// Runs twice per protocol round: advisorily against a snapshot for
/// availability queries, and authoritatively under the resource write
/// lock inside the store's insert. `excluding` supports update-in-place
/// semantics.
pub fn check_overlap(
    calendar: &Calendar,
    interval: &TimeInterval,
    excluding: Option<BookingId>,
) -> Result<(), Rejected> {
    for booking in calendar.overlapping(interval) {
        if excluding == Some(booking.id) {
            continue;
        }
        return Err(Rejected::Overlap {
            conflicting: booking.id,
        });
    }
    Ok(())
}

/// Reject proposals starting earlier than now minus the grace margin.
/// All comparisons are UTC milliseconds.
pub fn check_start_not_past(interval: &TimeInterval, now: Ms) -> Result<(), Rejected> {
    if interval.start < now - GRACE_MS {
        return Err(Rejected::PastStart);
    }
    Ok(())
}
