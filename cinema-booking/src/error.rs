use tracing::debug;

use cinema_core::error::StoreError;

use crate::lock::LockError;
use crate::seat_cache::SeatCacheError;

/// Failures visible to callers of the booking core.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Seat unavailable")]
    SeatUnavailable,

    /// Another request holds the screening; retrying later may succeed.
    #[error("Screening is busy, try again")]
    TryAgain,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    /// Detail is kept for logs and not shown to users.
    #[error("Booking failed")]
    Failed(String),
}

impl BookingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::TryAgain)
    }
}

pub type BookingResult<T> = Result<T, BookingError>;

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(detail) => {
                debug!(%detail, "Durable store rejected a held seat");
                BookingError::SeatUnavailable
            }
            StoreError::NotFound(what) => BookingError::NotFound(what),
            other => BookingError::Failed(other.to_string()),
        }
    }
}

impl From<LockError> for BookingError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::AlreadyLocked(_) => BookingError::TryAgain,
            LockError::Unavailable(e) => BookingError::Failed(e.to_string()),
        }
    }
}

impl From<SeatCacheError> for BookingError {
    fn from(err: SeatCacheError) -> Self {
        match err {
            SeatCacheError::SeatAlreadyLocked(_) => BookingError::SeatUnavailable,
            SeatCacheError::UnknownSeat { seat_id, .. } => {
                BookingError::Validation(format!("seat {} does not exist in this hall", seat_id))
            }
            other => BookingError::Failed(other.to_string()),
        }
    }
}
