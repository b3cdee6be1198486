use ulid::Ulid;

use crate::store::StoreError;
use crate::window::{ClockTime, Window, WindowError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    MalformedTime(String),
    InvalidWindow { start: ClockTime, end: ClockTime },
    SpaceNotFound(Ulid),
    SpaceInactive(Ulid),
    /// The requested window overlaps this active reservation.
    Conflict { reservation_id: Ulid, window: Window },
    NotFound(Ulid),
    Forbidden(Ulid),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MalformedTime(text) => write!(f, "malformed time {text:?}: expected HH:MM"),
            EngineError::InvalidWindow { start, end } => {
                write!(f, "invalid window: end {end} must be after start {start}")
            }
            EngineError::SpaceNotFound(id) => write!(f, "space not found: {id}"),
            EngineError::SpaceInactive(id) => write!(f, "space {id} is inactive"),
            EngineError::Conflict { reservation_id, window } => {
                write!(f, "conflicts with reservation {reservation_id} at {window}")
            }
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::Forbidden(id) => write!(f, "not permitted to access reservation {id}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<WindowError> for EngineError {
    fn from(e: WindowError) -> Self {
        match e {
            WindowError::Malformed(text) => EngineError::MalformedTime(text),
            WindowError::Inverted { start, end } => EngineError::InvalidWindow { start, end },
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Overlap { reservation_id, window } => {
                EngineError::Conflict { reservation_id, window }
            }
            StoreError::NotFound(id) => EngineError::NotFound(id),
            e @ (StoreError::AlreadyExists(_) | StoreError::Io(_)) => {
                EngineError::Storage(e.to_string())
            }
        }
    }
}
