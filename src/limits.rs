use crate::model::Ms;

pub const MAX_REACTORS: usize = 10_000;
/// Bookings + downtime held per reactor, cancelled records included.
pub const MAX_RECORDS_PER_REACTOR: usize = 100_000;
pub const MAX_TEXT_LEN: usize = 1_024;
pub const MAX_SERIAL_LEN: usize = 64;
pub const MAX_BATCH_SIZE: usize = 1_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single booking or downtime may not exceed ~400 days.
pub const MAX_SPAN_DURATION_MS: Ms = 400 * 24 * 3_600_000;
/// Occupancy windows up to ~10 years.
pub const MAX_QUERY_WINDOW_MS: Ms = 3_660 * 24 * 3_600_000;
