use ulid::Ulid;

use crate::model::{ReservationStatus, WindowError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("inactive: {0}")]
    Inactive(Ulid),
    #[error("reservation {id} is {from}; cannot become {to}")]
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("invalid stay window: {0}")]
    InvalidWindow(#[from] WindowError),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
