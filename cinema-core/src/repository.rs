use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{Booking, BookingStatus, NewBooking, Screening, Seat};

/// Read access to screenings
#[async_trait]
pub trait ScreeningRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Screening>>;

    async fn list_starting_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Screening>>;
}

/// Read access to hall seat layouts
#[async_trait]
pub trait HallRepository: Send + Sync {
    async fn seats_for_hall(&self, hall_id: i64) -> StoreResult<Vec<Seat>>;
}

/// Read-only booking queries that run outside a transaction
#[async_trait]
pub trait BookingQueries: Send + Sync {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Booking>>;

    /// Seat IDs held by non-canceled bookings of a screening.
    async fn active_seat_ids(&self, screening_id: i64) -> StoreResult<Vec<i64>>;
}

/// Booking writes, scoped to one open transaction
#[async_trait]
pub trait BookingRepository: Send {
    /// Inserts the booking and all of its booked seats. A seat already held
    /// by another non-canceled booking fails with `StoreError::Conflict`.
    async fn create(&mut self, booking: &NewBooking) -> StoreResult<Booking>;

    async fn find_by_id(&mut self, id: i64) -> StoreResult<Option<Booking>>;

    /// Moves a booking to `to` only while its status is one of `from`, and
    /// returns whether it moved. Canceling also releases the booked seats for
    /// other bookings.
    async fn transition_status(
        &mut self,
        id: i64,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> StoreResult<bool>;
}

/// Repository handles bound to one transaction.
///
/// Dropping a provider without calling `commit` discards every write made
/// through it.
#[async_trait]
pub trait RepositoryProvider: Send {
    fn bookings(&mut self) -> &mut dyn BookingRepository;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn RepositoryProvider>>;
}
