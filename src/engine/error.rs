use ulid::Ulid;

use crate::model::{DowntimeKind, Ms, Span};

/// Machine-checkable category of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Chronology,
    BookingConflict,
    DowntimeConflict,
    PolicyViolation,
    NotFound,
    AlreadyExists,
    LimitExceeded,
    Timeout,
    Wal,
}

#[derive(Debug)]
pub enum EngineError {
    /// End is not after start (bookings, downtime and reporting windows alike).
    Chronology { start: Ms, end: Ms },
    BookingConflict {
        id: Ulid,
        product_name: String,
        span: Span,
    },
    DowntimeConflict {
        id: Ulid,
        kind: DowntimeKind,
        span: Span,
    },
    PolicyViolation(String),
    NotFound(String),
    AlreadyExists(String),
    LimitExceeded(&'static str),
    /// Waited too long for a reactor's write lock.
    Timeout(String),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Chronology { .. } => ErrorKind::Chronology,
            EngineError::BookingConflict { .. } => ErrorKind::BookingConflict,
            EngineError::DowntimeConflict { .. } => ErrorKind::DowntimeConflict,
            EngineError::PolicyViolation(_) => ErrorKind::PolicyViolation,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            EngineError::Timeout(_) => ErrorKind::Timeout,
            EngineError::WalError(_) => ErrorKind::Wal,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::BookingConflict { .. } | EngineError::DowntimeConflict { .. }
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Chronology { start, end } => {
                write!(f, "end time must be after start time: [{start}, {end})")
            }
            EngineError::BookingConflict {
                id,
                product_name,
                span,
            } => write!(
                f,
                "reactor already booked for {product_name} [{}, {}) (booking {id})",
                span.start, span.end
            ),
            EngineError::DowntimeConflict { id, kind, span } => write!(
                f,
                "reactor unavailable due to {} downtime [{}, {}) (downtime {id})",
                kind.as_str(),
                span.start,
                span.end
            ),
            EngineError::PolicyViolation(msg) => write!(f, "policy violation: {msg}"),
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Timeout(what) => write!(f, "timed out waiting for {what}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
