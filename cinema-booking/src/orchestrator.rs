//! Booking creation protocol.
//!
//! One attempt takes the screening's lock, reserves the seats in the shared
//! seat map, writes the booking in a single transaction and releases the lock
//! on every exit path. The durable unique constraint on (screening, seat) is
//! authoritative; the seat map only keeps contended requests from reaching it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use cinema_core::error::{StoreError, StoreResult};
use cinema_core::models::{Booking, BookingStatus, NewBooking, Screening, SeatStatus};
use cinema_core::repository::{BookingQueries, HallRepository, UnitOfWork};
use cinema_store::app_config::BookingRules;
use cinema_store::keys;

use crate::backends::Backends;
use crate::error::{BookingError, BookingResult};
use crate::lock::{Lock, LockError, LockProvider};
use crate::screening_cache::ScreeningCache;
use crate::seat_cache::{layout_order, seat_statuses, SeatAvailabilityCache, SeatCacheError};

pub struct BookingService {
    pub(crate) locks: LockProvider,
    pub(crate) seats: SeatAvailabilityCache,
    pub(crate) screenings: ScreeningCache,
    pub(crate) halls: Arc<dyn HallRepository>,
    pub(crate) bookings: Arc<dyn BookingQueries>,
    pub(crate) unit_of_work: Arc<dyn UnitOfWork>,
    pub(crate) rules: BookingRules,
}

impl BookingService {
    pub fn new(backends: Backends, rules: BookingRules) -> Self {
        Self {
            locks: LockProvider::new(backends.leases),
            seats: SeatAvailabilityCache::new(backends.seat_state),
            screenings: ScreeningCache::new(backends.cache, backends.screenings, rules.cache_ttl()),
            halls: backends.halls,
            bookings: backends.bookings,
            unit_of_work: backends.unit_of_work,
            rules,
        }
    }

    /// Books `seat_ids` for a user. The booking starts out pending.
    pub async fn create_booking(
        &self,
        user_id: i64,
        screening_id: i64,
        seat_ids: Vec<i64>,
    ) -> BookingResult<Booking> {
        self.validate_seat_request(&seat_ids)?;

        let screening = self.screening(screening_id).await?;
        if screening.has_started(Utc::now()) {
            return Err(BookingError::Validation(format!(
                "screening {} has already started",
                screening_id
            )));
        }

        let lock = self.lock_screening(screening_id).await?;
        let mut attempt = Attempt::new(lock, self.seats.clone(), screening_id);
        let outcome = self
            .reserve_and_persist(&mut attempt, user_id, &screening, &seat_ids)
            .await;
        if let Some(lock) = attempt.into_lock() {
            self.unlock(lock).await;
        }

        match &outcome {
            Ok(booking) => info!(
                booking_id = booking.id,
                screening_id,
                user_id,
                seats = seat_ids.len(),
                "Booking created"
            ),
            Err(BookingError::SeatUnavailable) => {
                debug!(screening_id, user_id, "Requested seats unavailable")
            }
            Err(BookingError::Failed(detail)) => {
                error!(screening_id, user_id, %detail, "Booking attempt failed")
            }
            Err(_) => {}
        }
        outcome
    }

    /// Seat availability for rendering. A missing cache entry is rebuilt from
    /// the durable store.
    pub async fn get_seat_map(&self, screening_id: i64) -> BookingResult<Vec<SeatStatus>> {
        match self.seats.get_seat_map(screening_id).await {
            Ok(map) => return Ok(map),
            Err(SeatCacheError::NotInitialized(_)) => {
                debug!(screening_id, "Seat map cache miss");
            }
            Err(e) => return Err(e.into()),
        }

        let screening = self.screening(screening_id).await?;

        match self
            .locks
            .acquire(&keys::screening_lock(screening_id), self.rules.lock_ttl())
            .await
        {
            Ok(lock) => {
                let rebuilt = match self.rebuild_seat_map(&screening).await {
                    Ok(()) => self
                        .seats
                        .get_seat_map(screening_id)
                        .await
                        .map_err(BookingError::from),
                    Err(e) => Err(e),
                };
                self.unlock(lock).await;
                rebuilt
            }
            // Someone else is booking or rebuilding; answer from the store.
            Err(LockError::AlreadyLocked(_)) => self.seat_map_from_store(&screening).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Cancels a booking and frees its seats in both stores.
    pub async fn cancel_booking(&self, booking_id: i64) -> BookingResult<Booking> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {}", booking_id)))?;
        if booking.status == BookingStatus::Canceled {
            return Err(BookingError::Validation(format!(
                "booking {} is already canceled",
                booking_id
            )));
        }

        let lock = self.lock_screening(booking.screening_id).await?;
        let outcome = self.cancel_locked(booking_id).await;
        self.unlock(lock).await;

        if let Ok(canceled) = &outcome {
            info!(booking_id, screening_id = canceled.screening_id, "Booking canceled");
        }
        outcome
    }

    /// Moves a pending booking to confirmed. Seats stay locked, so the seat
    /// map is not touched.
    pub async fn confirm_booking(&self, booking_id: i64) -> BookingResult<Booking> {
        let mut tx = self.unit_of_work.begin().await?;
        let mut booking = tx
            .bookings()
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {}", booking_id)))?;

        match booking.status {
            BookingStatus::Confirmed => return Ok(booking),
            BookingStatus::Canceled => {
                return Err(BookingError::Validation(format!(
                    "booking {} is canceled",
                    booking_id
                )))
            }
            BookingStatus::Pending => {}
        }

        let moved = tx
            .bookings()
            .transition_status(booking_id, &[BookingStatus::Pending], BookingStatus::Confirmed)
            .await?;
        if !moved {
            // Moved by another transaction since the read above.
            return match tx.bookings().find_by_id(booking_id).await? {
                Some(current) if current.status == BookingStatus::Confirmed => Ok(current),
                _ => Err(BookingError::Validation(format!(
                    "booking {} is canceled",
                    booking_id
                ))),
            };
        }
        tx.commit().await?;

        booking.status = BookingStatus::Confirmed;
        info!(booking_id, "Booking confirmed");
        Ok(booking)
    }

    fn validate_seat_request(&self, seat_ids: &[i64]) -> BookingResult<()> {
        if seat_ids.is_empty() {
            return Err(BookingError::Validation("no seats requested".to_string()));
        }
        if seat_ids.len() > self.rules.max_seats_per_booking {
            return Err(BookingError::Validation(format!(
                "at most {} seats per booking",
                self.rules.max_seats_per_booking
            )));
        }
        let mut seen = HashSet::with_capacity(seat_ids.len());
        if let Some(dup) = seat_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(BookingError::Validation(format!("seat {} requested twice", dup)));
        }
        Ok(())
    }

    async fn screening(&self, screening_id: i64) -> BookingResult<Screening> {
        self.screenings
            .get(screening_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("screening {}", screening_id)))
    }

    async fn lock_screening(&self, screening_id: i64) -> BookingResult<Lock> {
        let lock = self
            .locks
            .acquire(&keys::screening_lock(screening_id), self.rules.lock_ttl())
            .await?;
        Ok(lock)
    }

    async fn unlock(&self, lock: Lock) {
        let key = lock.key().to_string();
        if let Err(e) = lock.release().await {
            // The lease still expires on its own.
            warn!(key = %key, error = %e, "Failed to release lock");
        }
    }

    /// Runs with the screening lock held by `attempt`.
    async fn reserve_and_persist(
        &self,
        attempt: &mut Attempt,
        user_id: i64,
        screening: &Screening,
        seat_ids: &[i64],
    ) -> BookingResult<Booking> {
        self.reserve_seats(screening, seat_ids).await?;
        attempt.hold_seats(seat_ids);

        let new_booking = NewBooking::new(user_id, screening, seat_ids.to_vec());
        let persisted = self.persist(&new_booking).await;
        if let Err(e) = &persisted {
            self.roll_back_reservation(screening, seat_ids, e).await;
        }
        attempt.settled();

        persisted.map_err(BookingError::from)
    }

    async fn reserve_seats(&self, screening: &Screening, seat_ids: &[i64]) -> BookingResult<()> {
        match self.seats.lock_seats(screening.id, seat_ids).await {
            Err(SeatCacheError::NotInitialized(_)) => {
                debug!(screening_id = screening.id, "Seat map missing, rebuilding");
                self.rebuild_seat_map(screening).await?;
                self.seats
                    .lock_seats(screening.id, seat_ids)
                    .await
                    .map_err(Into::into)
            }
            other => other.map_err(Into::into),
        }
    }

    async fn persist(&self, booking: &NewBooking) -> StoreResult<Booking> {
        let mut tx = self.unit_of_work.begin().await?;
        let created = match tx.bookings().create(booking).await {
            Ok(created) => created,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                return Err(e);
            }
        };
        tx.commit().await?;
        Ok(created)
    }

    /// Undoes this attempt's seat reservation after a failed durable write.
    async fn roll_back_reservation(
        &self,
        screening: &Screening,
        seat_ids: &[i64],
        cause: &StoreError,
    ) {
        let undone = if cause.is_conflict() {
            // The store holds a seat the cache thought free: resync from the store.
            warn!(screening_id = screening.id, "Seat map disagreed with durable store, rebuilding");
            self.rebuild_seat_map(screening).await
        } else {
            self.seats
                .release_seats(screening.id, seat_ids)
                .await
                .map_err(BookingError::from)
        };

        if let Err(e) = undone {
            error!(
                screening_id = screening.id,
                error = %e,
                "Failed to roll back seat reservation"
            );
        }
    }

    /// Caller must hold the screening lock.
    pub(crate) async fn rebuild_seat_map(&self, screening: &Screening) -> BookingResult<()> {
        let layout = self.halls.seats_for_hall(screening.hall_id).await?;
        let booked = self.bookings.active_seat_ids(screening.id).await?;
        self.seats
            .init_seat_map(screening.id, &layout, &booked, self.rules.cache_ttl())
            .await?;
        Ok(())
    }

    async fn seat_map_from_store(&self, screening: &Screening) -> BookingResult<Vec<SeatStatus>> {
        let layout = self.halls.seats_for_hall(screening.hall_id).await?;
        let booked: HashSet<i64> = self
            .bookings
            .active_seat_ids(screening.id)
            .await?
            .into_iter()
            .collect();
        Ok(seat_statuses(layout_order(&layout), &booked))
    }

    async fn cancel_locked(&self, booking_id: i64) -> BookingResult<Booking> {
        let mut tx = self.unit_of_work.begin().await?;
        let mut booking = tx
            .bookings()
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {}", booking_id)))?;
        if booking.status == BookingStatus::Canceled {
            return Err(BookingError::Validation(format!(
                "booking {} is already canceled",
                booking_id
            )));
        }

        let moved = tx
            .bookings()
            .transition_status(
                booking_id,
                &[BookingStatus::Pending, BookingStatus::Confirmed],
                BookingStatus::Canceled,
            )
            .await?;
        if !moved {
            return Err(BookingError::Validation(format!(
                "booking {} is already canceled",
                booking_id
            )));
        }
        tx.commit().await?;
        booking.status = BookingStatus::Canceled;

        if let Err(e) = self
            .seats
            .release_seats(booking.screening_id, &booking.seat_ids())
            .await
        {
            // Seats read as taken until the map is rebuilt; never oversold.
            warn!(booking_id, error = %e, "Failed to release canceled seats in cache");
        }
        Ok(booking)
    }
}

/// The screening lock held by one booking attempt, plus the seats it has
/// reserved in the seat map but not yet committed or rolled back. Dropping it
/// mid-attempt releases those seats and only then the lock.
struct Attempt {
    lock: Option<Lock>,
    seats: SeatAvailabilityCache,
    screening_id: i64,
    reserved: Vec<i64>,
}

impl Attempt {
    fn new(lock: Lock, seats: SeatAvailabilityCache, screening_id: i64) -> Self {
        Self {
            lock: Some(lock),
            seats,
            screening_id,
            reserved: Vec::new(),
        }
    }

    fn hold_seats(&mut self, seat_ids: &[i64]) {
        self.reserved = seat_ids.to_vec();
    }

    /// The reservation is now backed by a booking or has been undone.
    fn settled(&mut self) {
        self.reserved.clear();
    }

    fn into_lock(mut self) -> Option<Lock> {
        self.reserved.clear();
        self.lock.take()
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        // Nothing reserved: the lock releases itself on drop.
        if self.reserved.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let seats = self.seats.clone();
        let screening_id = self.screening_id;
        let seat_ids = std::mem::take(&mut self.reserved);
        warn!(
            screening_id,
            seats = seat_ids.len(),
            "Booking attempt abandoned, releasing seats"
        );

        runtime.spawn(async move {
            if let Err(e) = seats.release_seats(screening_id, &seat_ids).await {
                error!(screening_id, error = %e, "Failed to release abandoned seats");
            }
            if let Err(e) = lock.release().await {
                warn!(screening_id, error = %e, "Failed to release lock");
            }
        });
    }
}
