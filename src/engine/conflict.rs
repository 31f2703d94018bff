use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Chronology first, then range limits. Returns the span on success.
pub fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if end <= start {
        return Err(EngineError::Chronology { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(Span::new(start, end))
}

/// Decide whether `[start, end)` may be committed on `reactor`.
///
/// Pure over the supplied snapshot, which may hold records for any number of
/// reactors. Bookings are scanned before downtime; within each, candidates are
/// visited by ascending `(start, id)` so the reported conflict does not depend
/// on how the snapshot was ordered. Records with id `exclude` are skipped, so an
/// edit never collides with its own prior version.
pub fn check_conflict(
    reactor: &str,
    start: Ms,
    end: Ms,
    exclude: Option<Ulid>,
    bookings: &[Booking],
    downtime: &[Downtime],
) -> Result<(), EngineError> {
    if end <= start {
        return Err(EngineError::Chronology { start, end });
    }
    let candidate = Span::new(start, end);

    let mut hits: Vec<&Booking> = bookings
        .iter()
        .filter(|b| {
            b.reactor_serial_no == reactor
                && b.is_active()
                && Some(b.id) != exclude
                && b.span.overlaps(&candidate)
        })
        .collect();
    hits.sort_by_key(|b| (b.span.start, b.id));
    if let Some(b) = hits.first() {
        return Err(EngineError::BookingConflict {
            id: b.id,
            product_name: b.product_name.clone(),
            span: b.span,
        });
    }

    let mut hits: Vec<&Downtime> = downtime
        .iter()
        .filter(|d| {
            d.reactor_serial_no == reactor
                && !d.is_cancelled
                && Some(d.id) != exclude
                && d.span.overlaps(&candidate)
        })
        .collect();
    hits.sort_by_key(|d| (d.span.start, d.id));
    if let Some(d) = hits.first() {
        return Err(EngineError::DowntimeConflict {
            id: d.id,
            kind: d.kind,
            span: d.span,
        });
    }

    Ok(())
}

/// Validator entry point for a locked reactor.
pub(crate) fn check_reactor(
    rs: &ReactorState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    check_conflict(
        &rs.reactor.serial_no,
        span.start,
        span.end,
        exclude,
        &rs.bookings,
        &rs.downtime,
    )
}
