use std::collections::HashMap;

use chrono::NaiveDate;

use crate::model::*;

use super::EngineError;

// ── Occupancy Algorithm ──────────────────────────────────────────

/// Milliseconds of `span` that fall inside `[window_start, window_end)`.
/// An empty intersection contributes zero.
pub fn clipped_ms(span: &Span, window_start: Ms, window_end: Ms) -> Ms {
    span.intersect(window_start, window_end)
        .map_or(0, |s| s.duration_ms())
}

fn to_hours(ms: Ms) -> f64 {
    ms as f64 / HOUR_MS as f64
}

fn percent_of(part_ms: Ms, available_ms: Ms) -> f64 {
    if available_ms > 0 {
        part_ms as f64 / available_ms as f64 * 100.0
    } else {
        0.0
    }
}

/// Length of `[window_start, window_end)`. An inverted window is a
/// chronology error; one too long to represent is over the limit.
pub fn window_len(window_start: Ms, window_end: Ms) -> Result<Ms, EngineError> {
    if window_end < window_start {
        return Err(EngineError::Chronology {
            start: window_start,
            end: window_end,
        });
    }
    window_end
        .checked_sub(window_start)
        .ok_or(EngineError::LimitExceeded("query window too wide"))
}

/// Per-reactor utilization over `[window_start, window_end)`.
///
/// One metric per reactor, in input order. Cancelled bookings and cancelled
/// downtime are ignored entirely. Durations are summed in integer
/// milliseconds and only converted to hours at the end, so available and
/// downtime hours add back up to the window length.
pub fn aggregate(
    window_start: Ms,
    window_end: Ms,
    reactors: &[Reactor],
    bookings: &[Booking],
    downtime: &[Downtime],
) -> Result<Vec<OccupancyMetric>, EngineError> {
    let total_ms = window_len(window_start, window_end)?;

    #[derive(Default)]
    struct Load {
        downtime_ms: Ms,
        proposed_ms: Ms,
        actual_ms: Ms,
    }

    let mut loads: HashMap<&str, Load> = HashMap::with_capacity(reactors.len());
    for d in downtime.iter().filter(|d| !d.is_cancelled) {
        loads.entry(d.reactor_serial_no.as_str()).or_default().downtime_ms +=
            clipped_ms(&d.span, window_start, window_end);
    }
    for b in bookings {
        let clipped = clipped_ms(&b.span, window_start, window_end);
        let load = loads.entry(b.reactor_serial_no.as_str()).or_default();
        match b.status {
            BookingStatus::Proposed => load.proposed_ms += clipped,
            BookingStatus::Actual => load.actual_ms += clipped,
            BookingStatus::Cancelled => {}
        }
    }

    let empty = Load::default();
    Ok(reactors
        .iter()
        .map(|r| {
            let load = loads.get(r.serial_no.as_str()).unwrap_or(&empty);
            let available_ms = (total_ms - load.downtime_ms).max(0);
            OccupancyMetric {
                reactor_serial_no: r.serial_no.clone(),
                window_start,
                window_end,
                available_hours: to_hours(available_ms),
                proposed_hours: to_hours(load.proposed_ms),
                proposed_percent: percent_of(load.proposed_ms, available_ms),
                actual_hours: to_hours(load.actual_ms),
                actual_percent: percent_of(load.actual_ms, available_ms),
                downtime_hours: to_hours(load.downtime_ms),
                plant_name: r.plant_name.clone(),
                block_name: r.block_name.clone(),
            }
        })
        .collect())
}

/// A named reporting window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
    pub label: String,
}

/// UTC calendar month `[first of month, first of next month)`, labelled
/// like `Feb 2026`.
pub fn month_window(year: i32, month: u32) -> Option<Window> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let start = first.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
    let end = next.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
    Some(Window {
        start,
        end,
        label: first.format("%b %Y").to_string(),
    })
}

/// Parses `YYYY-MM`.
pub fn parse_month(s: &str) -> Option<Window> {
    let (y, m) = s.trim().split_once('-')?;
    month_window(y.parse().ok()?, m.parse().ok()?)
}
