use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use cinema_core::error::{StoreError, StoreResult};
use cinema_core::models::{BookedSeat, Booking, BookingStatus, NewBooking, Screening, Seat};
use cinema_core::repository::{
    BookingQueries, BookingRepository, HallRepository, RepositoryProvider, ScreeningRepository,
    UnitOfWork,
};

#[derive(Debug, Clone, Default)]
struct DbState {
    screenings: BTreeMap<i64, Screening>,
    seats: BTreeMap<i64, Seat>,
    bookings: BTreeMap<i64, Booking>,
    /// (screening, seat) -> booking, for non-canceled bookings only.
    active_seats: HashMap<(i64, i64), i64>,
    next_booking_id: i64,
    next_booked_seat_id: i64,
}

/// Durable-store implementation held in process memory.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DbState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_screening(&self, screening: Screening) {
        self.state
            .lock()
            .await
            .screenings
            .insert(screening.id, screening);
    }

    pub async fn insert_seats(&self, seats: impl IntoIterator<Item = Seat>) {
        let mut state = self.state.lock().await;
        for seat in seats {
            state.seats.insert(seat.id, seat);
        }
    }

    /// Makes the next transaction commit fail, leaving the data untouched.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.state.lock().await.bookings.values().cloned().collect()
    }
}

#[async_trait]
impl ScreeningRepository for MemoryDatabase {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Screening>> {
        Ok(self.state.lock().await.screenings.get(&id).cloned())
    }

    async fn list_starting_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Screening>> {
        let state = self.state.lock().await;
        let mut screenings: Vec<Screening> = state
            .screenings
            .values()
            .filter(|s| s.starts_at >= from && s.starts_at < until)
            .cloned()
            .collect();
        screenings.sort_by_key(|s| s.starts_at);
        Ok(screenings)
    }
}

#[async_trait]
impl HallRepository for MemoryDatabase {
    async fn seats_for_hall(&self, hall_id: i64) -> StoreResult<Vec<Seat>> {
        let state = self.state.lock().await;
        Ok(state
            .seats
            .values()
            .filter(|s| s.hall_id == hall_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BookingQueries for MemoryDatabase {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Booking>> {
        Ok(self.state.lock().await.bookings.get(&id).cloned())
    }

    async fn active_seat_ids(&self, screening_id: i64) -> StoreResult<Vec<i64>> {
        let state = self.state.lock().await;
        let mut ids: Vec<i64> = state
            .active_seats
            .keys()
            .filter(|(screening, _)| *screening == screening_id)
            .map(|(_, seat)| *seat)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl UnitOfWork for MemoryDatabase {
    async fn begin(&self) -> StoreResult<Box<dyn RepositoryProvider>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            bookings: MemoryBookingRepository { state: working },
            fail_commit: self.fail_next_commit.clone(),
        }))
    }
}

/// Holds the database exclusively and applies its working copy on commit.
struct MemoryTransaction {
    guard: OwnedMutexGuard<DbState>,
    bookings: MemoryBookingRepository,
    fail_commit: Arc<AtomicBool>,
}

#[async_trait]
impl RepositoryProvider for MemoryTransaction {
    fn bookings(&mut self) -> &mut dyn BookingRepository {
        &mut self.bookings
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit failed".to_string()));
        }
        let MemoryTransaction {
            mut guard, bookings, ..
        } = *self;
        *guard = bookings.state;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

struct MemoryBookingRepository {
    state: DbState,
}

#[async_trait]
impl BookingRepository for MemoryBookingRepository {
    async fn create(&mut self, booking: &NewBooking) -> StoreResult<Booking> {
        let state = &mut self.state;
        state.next_booking_id += 1;
        let booking_id = state.next_booking_id;

        let mut seats = Vec::with_capacity(booking.seat_ids.len());
        for seat_id in &booking.seat_ids {
            let slot = (booking.screening_id, *seat_id);
            if let Some(holder) = state.active_seats.get(&slot) {
                return Err(StoreError::Conflict(format!(
                    "seat {} of screening {} is held by booking {}",
                    seat_id, booking.screening_id, holder
                )));
            }
            state.active_seats.insert(slot, booking_id);

            state.next_booked_seat_id += 1;
            seats.push(BookedSeat {
                id: state.next_booked_seat_id,
                booking_id,
                screening_id: booking.screening_id,
                seat_id: *seat_id,
                price: booking.seat_price,
            });
        }

        let created = Booking {
            id: booking_id,
            user_id: booking.user_id,
            screening_id: booking.screening_id,
            seats,
            total_amount: booking.total_amount(),
            status: BookingStatus::Pending,
            created_at: booking.created_at,
        };
        state.bookings.insert(booking_id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&mut self, id: i64) -> StoreResult<Option<Booking>> {
        Ok(self.state.bookings.get(&id).cloned())
    }

    async fn transition_status(
        &mut self,
        id: i64,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> StoreResult<bool> {
        let Some(booking) = self.state.bookings.get_mut(&id) else {
            return Ok(false);
        };
        if !from.contains(&booking.status) {
            return Ok(false);
        }
        booking.status = to;

        if to == BookingStatus::Canceled {
            self.state.active_seats.retain(|_, holder| *holder != id);
        }
        Ok(true)
    }
}
