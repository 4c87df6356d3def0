use ulid::Ulid;

use crate::catalog::CatalogError;
use crate::model::ReservationStatus;

/// Coarse class of an [`EngineError`]. The wire layer maps each to a SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Forbidden,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    InvalidDateRange,
    Validation(String),
    LimitExceeded(&'static str),
    InvalidStatus(String),
    VehicleNotFound(Ulid),
    ReservationNotFound(Ulid),
    AlreadyExists(Ulid),
    AlreadyReserved {
        vehicle_id: Ulid,
        conflicting: Ulid,
    },
    DuplicateReview {
        vehicle_id: Ulid,
    },
    CannotCancel(Ulid),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    HasBlockingReservations(Ulid),
    Forbidden(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidDateRange
            | EngineError::Validation(_)
            | EngineError::LimitExceeded(_)
            | EngineError::InvalidStatus(_) => ErrorKind::Validation,
            EngineError::VehicleNotFound(_) | EngineError::ReservationNotFound(_) => {
                ErrorKind::NotFound
            }
            EngineError::AlreadyExists(_)
            | EngineError::AlreadyReserved { .. }
            | EngineError::DuplicateReview { .. }
            | EngineError::CannotCancel(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::HasBlockingReservations(_) => ErrorKind::Conflict,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDateRange => write!(f, "endDate must be greater than startDate"),
            EngineError::Validation(msg) => write!(f, "{msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::InvalidStatus(s) => write!(f, "invalid status: {s}"),
            EngineError::VehicleNotFound(id) => write!(f, "car not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::AlreadyReserved { vehicle_id, conflicting } => write!(
                f,
                "car already reserved for selected dates: {vehicle_id} (reservation {conflicting})"
            ),
            EngineError::DuplicateReview { vehicle_id } => {
                write!(f, "you have already reviewed car {vehicle_id}")
            }
            EngineError::CannotCancel(id) => write!(f, "reservation cannot be cancelled: {id}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot change reservation status from {from} to {to}")
            }
            EngineError::HasBlockingReservations(id) => {
                write!(f, "cannot delete car {id}: it has open reservations")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<CatalogError> for EngineError {
    fn from(e: CatalogError) -> Self {
        EngineError::Validation(e.to_string())
    }
}
