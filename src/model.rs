use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap: `[a, b)` and `[b, c)` are disjoint.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// The part of `self` inside `[window_start, window_end)`, or `None` when
    /// nothing is left.
    pub fn intersect(&self, window_start: Ms, window_end: Ms) -> Option<Span> {
        let start = self.start.max(window_start);
        let end = self.end.min(window_end);
        (start < end).then_some(Span { start, end })
    }

    pub fn overlaps_window(&self, window_start: Ms, window_end: Ms) -> bool {
        self.intersect(window_start, window_end).is_some()
    }
}

// ── Reactors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactor {
    pub serial_no: String,
    pub max_capacity_liters: u32,
    pub capacity_range: String,
    pub moc: String,
    pub agitator_type: String,
    pub plant_name: String,
    pub block_name: String,
    pub commission_date: NaiveDate,
    pub notes: Option<String>,
}

/// Partial reactor update. `None` leaves the field untouched; `notes` uses a
/// nested option so it can be cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactorPatch {
    pub max_capacity_liters: Option<u32>,
    pub capacity_range: Option<String>,
    pub moc: Option<String>,
    pub agitator_type: Option<String>,
    pub plant_name: Option<String>,
    pub block_name: Option<String>,
    pub commission_date: Option<NaiveDate>,
    pub notes: Option<Option<String>>,
}

impl ReactorPatch {
    pub fn apply(self, r: &mut Reactor) {
        if let Some(v) = self.max_capacity_liters {
            r.max_capacity_liters = v;
        }
        if let Some(v) = self.capacity_range {
            r.capacity_range = v;
        }
        if let Some(v) = self.moc {
            r.moc = v;
        }
        if let Some(v) = self.agitator_type {
            r.agitator_type = v;
        }
        if let Some(v) = self.plant_name {
            r.plant_name = v;
        }
        if let Some(v) = self.block_name {
            r.block_name = v;
        }
        if let Some(v) = self.commission_date {
            r.commission_date = v;
        }
        if let Some(v) = self.notes {
            r.notes = v;
        }
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    Cds,
    Mfg,
    TechTransfer,
}

impl Team {
    pub fn as_str(&self) -> &'static str {
        match self {
            Team::Cds => "CDS",
            Team::Mfg => "Mfg",
            Team::TechTransfer => "Tech Transfer",
        }
    }

    /// Case-insensitive; accepts both `Tech Transfer` and `TechTransfer`.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "cds" => Some(Team::Cds),
            "mfg" => Some(Team::Mfg),
            "techtransfer" => Some(Team::TechTransfer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Proposed,
    Actual,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Proposed => "Proposed",
            BookingStatus::Actual => "Actual",
            BookingStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "proposed" => Some(BookingStatus::Proposed),
            "actual" => Some(BookingStatus::Actual),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Allowed status moves. Cancelled is terminal and Actual never goes back
    /// to Proposed.
    pub fn can_become(&self, next: BookingStatus) -> bool {
        match self {
            BookingStatus::Proposed => true,
            BookingStatus::Actual => next != BookingStatus::Proposed,
            BookingStatus::Cancelled => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub reactor_serial_no: String,
    pub team: Team,
    pub product_name: String,
    pub stage: String,
    pub batch_number: String,
    pub operation: String,
    pub span: Span,
    pub status: BookingStatus,
    pub requested_by_email: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }
}

/// Fields a caller supplies to create a booking. Audit timestamps are
/// stamped by the engine at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub reactor_serial_no: String,
    pub team: Team,
    pub product_name: String,
    pub stage: String,
    pub batch_number: String,
    pub operation: String,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
    pub requested_by_email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub reactor_serial_no: Option<String>,
    pub team: Option<Team>,
    pub product_name: Option<String>,
    pub stage: Option<String>,
    pub batch_number: Option<String>,
    pub operation: Option<String>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub status: Option<BookingStatus>,
    pub requested_by_email: Option<String>,
}

impl BookingPatch {
    /// True when the patch can move the booking in time or onto another reactor.
    pub fn touches_schedule(&self) -> bool {
        self.reactor_serial_no.is_some() || self.start.is_some() || self.end.is_some()
    }
}

// ── Downtime ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DowntimeKind {
    Maintenance,
    Cleaning,
    Calibration,
    Breakdown,
}

impl DowntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DowntimeKind::Maintenance => "Maintenance",
            DowntimeKind::Cleaning => "Cleaning",
            DowntimeKind::Calibration => "Calibration",
            DowntimeKind::Breakdown => "Breakdown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "maintenance" => Some(DowntimeKind::Maintenance),
            "cleaning" => Some(DowntimeKind::Cleaning),
            "calibration" => Some(DowntimeKind::Calibration),
            "breakdown" => Some(DowntimeKind::Breakdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downtime {
    pub id: Ulid,
    pub reactor_serial_no: String,
    pub span: Span,
    pub kind: DowntimeKind,
    pub reason: String,
    pub updated_by_email: String,
    pub updated_at: Ms,
    pub is_cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDowntime {
    pub id: Ulid,
    pub reactor_serial_no: String,
    pub start: Ms,
    pub end: Ms,
    pub kind: DowntimeKind,
    pub reason: String,
    pub updated_by_email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DowntimePatch {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub kind: Option<DowntimeKind>,
    pub reason: Option<String>,
    pub updated_by_email: Option<String>,
    pub is_cancelled: Option<bool>,
}

// ── Per-reactor state ────────────────────────────────────────────

/// Everything the engine holds for one reactor. Bookings and downtime are
/// each kept sorted by `(span.start, id)`, which is also the order conflicts
/// are reported in.
#[derive(Debug, Clone)]
pub struct ReactorState {
    pub reactor: Reactor,
    pub bookings: Vec<Booking>,
    pub downtime: Vec<Downtime>,
}

impl ReactorState {
    pub fn new(reactor: Reactor) -> Self {
        Self {
            reactor,
            bookings: Vec::new(),
            downtime: Vec::new(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.bookings.len() + self.downtime.len()
    }

    /// Insert or replace a booking, keeping sort order.
    pub fn upsert_booking(&mut self, booking: Booking) {
        self.remove_booking(booking.id);
        let key = (booking.span.start, booking.id);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.span.start, b.id))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn upsert_downtime(&mut self, downtime: Downtime) {
        if let Some(pos) = self.downtime.iter().position(|d| d.id == downtime.id) {
            self.downtime.remove(pos);
        }
        let key = (downtime.span.start, downtime.id);
        let pos = self
            .downtime
            .binary_search_by_key(&key, |d| (d.span.start, d.id))
            .unwrap_or_else(|e| e);
        self.downtime.insert(pos, downtime);
    }

    pub fn downtime(&self, id: Ulid) -> Option<&Downtime> {
        self.downtime.iter().find(|d| d.id == id)
    }

    /// Audit history that forbids removing the reactor: executed or cancelled
    /// bookings and any downtime record.
    pub fn has_audit_history(&self) -> bool {
        !self.downtime.is_empty()
            || self
                .bookings
                .iter()
                .any(|b| b.status != BookingStatus::Proposed)
    }
}

/// Committed state changes. Also the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReactorRegistered { reactor: Reactor },
    ReactorUpdated { reactor: Reactor },
    ReactorRemoved { serial_no: String },
    BookingCommitted { booking: Booking },
    BookingRevised { booking: Booking },
    /// A revision that also moved the booking off `from_reactor_serial_no`.
    BookingMoved {
        from_reactor_serial_no: String,
        booking: Booking,
    },
    BookingRemoved { id: Ulid, reactor_serial_no: String },
    DowntimeCommitted { downtime: Downtime },
    DowntimeRevised { downtime: Downtime },
}

impl Event {
    pub fn reactor_serial_no(&self) -> &str {
        match self {
            Event::ReactorRegistered { reactor } | Event::ReactorUpdated { reactor } => {
                &reactor.serial_no
            }
            Event::ReactorRemoved { serial_no } => serial_no,
            Event::BookingCommitted { booking }
            | Event::BookingRevised { booking }
            | Event::BookingMoved { booking, .. } => &booking.reactor_serial_no,
            Event::BookingRemoved {
                reactor_serial_no, ..
            } => reactor_serial_no,
            Event::DowntimeCommitted { downtime } | Event::DowntimeRevised { downtime } => {
                &downtime.reactor_serial_no
            }
        }
    }

    /// The reactor a booking left, for moves.
    pub fn previous_reactor_serial_no(&self) -> Option<&str> {
        match self {
            Event::BookingMoved {
                from_reactor_serial_no,
                ..
            } => Some(from_reactor_serial_no),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Event::ReactorRegistered { .. } => "reactor_registered",
            Event::ReactorUpdated { .. } => "reactor_updated",
            Event::ReactorRemoved { .. } => "reactor_removed",
            Event::BookingCommitted { .. } => "booking_committed",
            Event::BookingRevised { .. } => "booking_revised",
            Event::BookingMoved { .. } => "booking_moved",
            Event::BookingRemoved { .. } => "booking_removed",
            Event::DowntimeCommitted { .. } => "downtime_committed",
            Event::DowntimeRevised { .. } => "downtime_revised",
        }
    }
}

// ── Derived metrics ──────────────────────────────────────────────

/// Utilization of one reactor over one reporting window. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyMetric {
    pub reactor_serial_no: String,
    pub window_start: Ms,
    pub window_end: Ms,
    pub available_hours: f64,
    pub proposed_hours: f64,
    pub proposed_percent: f64,
    pub actual_hours: f64,
    pub actual_percent: f64,
    pub downtime_hours: f64,
    pub plant_name: String,
    pub block_name: String,
}
