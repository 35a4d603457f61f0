use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Check raw bounds and promote them to a `Span`. Inverted and zero-length
/// windows are rejected here, before any calendar is consulted.
pub(crate) fn validated_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::Validation("span start must precede its end"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(Span::new(start, end))
}

/// Scan the calendar for an active booking overlapping `span`.
///
/// Canceled bookings never block a slot. `exclude` skips one booking id
/// so a reschedule is not reported as colliding with itself. The first
/// overlapping booking in calendar order is the one named in the error.
pub(crate) fn check_no_conflict(
    cal: &SpaceCalendar,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for booking in cal.overlapping(span) {
        if !booking.status.is_active() {
            continue;
        }
        if exclude == Some(booking.id) {
            continue;
        }
        return Err(EngineError::Conflict(booking.id));
    }
    Ok(())
}
