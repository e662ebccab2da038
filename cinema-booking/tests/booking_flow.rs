use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use cinema_booking::{Backends, BookingError, BookingResult, BookingService, LockProvider};
use cinema_core::error::StoreResult;
use cinema_core::models::{
    Booking, BookingStatus, NewBooking, Screening, Seat, SeatStatus, SeatType,
};
use cinema_core::repository::{RepositoryProvider, UnitOfWork};
use cinema_store::app_config::BookingRules;
use cinema_store::{keys, MemoryDatabase, MemoryStore};

const SCREENING: i64 = 1;
const HALL: i64 = 1;

struct Fixture {
    service: Arc<BookingService>,
    store: MemoryStore,
    db: MemoryDatabase,
}

fn seat(id: i64) -> Seat {
    Seat {
        id,
        hall_id: HALL,
        row: "A".to_string(),
        number: id as i32,
        seat_type: SeatType::Standard,
    }
}

fn screening(id: i64, starts_in: ChronoDuration) -> Screening {
    let starts_at = Utc::now() + starts_in;
    Screening {
        id,
        movie_id: 10,
        hall_id: HALL,
        starts_at,
        ends_at: starts_at + ChronoDuration::hours(2),
        seat_price: 1000,
    }
}

fn rules() -> BookingRules {
    BookingRules {
        lock_ttl_seconds: 5,
        cache_ttl_seconds: 600,
        max_seats_per_booking: 4,
    }
}

async fn fixture(seat_count: i64) -> Fixture {
    let store = MemoryStore::new();
    let db = MemoryDatabase::new();
    db.insert_screening(screening(SCREENING, ChronoDuration::hours(2))).await;
    db.insert_seats((1..=seat_count).map(seat)).await;

    let service = BookingService::new(Backends::in_memory(store.clone(), db.clone()), rules());

    Fixture {
        service: Arc::new(service),
        store,
        db,
    }
}

/// A second service over the fixture's stores whose transactions come from
/// `unit_of_work`.
fn service_with(fx: &Fixture, unit_of_work: Arc<dyn UnitOfWork>) -> Arc<BookingService> {
    let mut backends = Backends::in_memory(fx.store.clone(), fx.db.clone());
    backends.unit_of_work = unit_of_work;
    Arc::new(BookingService::new(backends, rules()))
}

/// Transactions that never open.
struct StalledUnitOfWork;

#[async_trait]
impl UnitOfWork for StalledUnitOfWork {
    async fn begin(&self) -> StoreResult<Box<dyn RepositoryProvider>> {
        std::future::pending().await
    }
}

struct CrashingUnitOfWork;

#[async_trait]
impl UnitOfWork for CrashingUnitOfWork {
    async fn begin(&self) -> StoreResult<Box<dyn RepositoryProvider>> {
        panic!("database driver crashed");
    }
}

/// Waits for the cleanup a dropped attempt schedules. Seats are released
/// before the lock, so a free lock means the seats are free too.
async fn wait_for_unlock(store: &MemoryStore) {
    for _ in 0..200 {
        if !store.contains(&keys::screening_lock(SCREENING)).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("screening lock was never released");
}

/// Retrying on contention is the caller's job.
async fn book(
    service: &BookingService,
    user_id: i64,
    seat_ids: Vec<i64>,
) -> BookingResult<Booking> {
    loop {
        match service.create_booking(user_id, SCREENING, seat_ids.clone()).await {
            Err(BookingError::TryAgain) => tokio::time::sleep(Duration::from_millis(1)).await,
            other => return other,
        }
    }
}

fn locked(map: &[SeatStatus]) -> Vec<i64> {
    map.iter()
        .filter(|s| !s.is_available())
        .map(|s| s.seat.id)
        .collect()
}

#[tokio::test]
async fn test_two_bookings_race_for_one_seat() {
    let fx = fixture(2).await;

    let a = tokio::spawn({
        let service = fx.service.clone();
        async move { book(&service, 100, vec![1]).await }
    });
    let b = tokio::spawn({
        let service = fx.service.clone();
        async move { book(&service, 200, vec![1]).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(BookingError::SeatUnavailable))));

    let map = fx.service.get_seat_map(SCREENING).await.unwrap();
    assert_eq!(locked(&map), vec![1]);
    assert_eq!(fx.db.bookings().await.len(), 1);
    assert!(!fx.store.contains(&keys::screening_lock(SCREENING)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_double_booking_under_load() {
    let fx = fixture(6).await;

    let mut handles = Vec::new();
    for user_id in 0..24i64 {
        let service = fx.service.clone();
        let seats = vec![user_id % 6 + 1, (user_id + 1) % 6 + 1];
        handles.push(tokio::spawn(async move { book(&service, user_id, seats).await }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) | Err(BookingError::SeatUnavailable) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    let mut booked: Vec<i64> = fx
        .db
        .bookings()
        .await
        .iter()
        .flat_map(|b| b.seat_ids())
        .collect();
    let total = booked.len();
    booked.sort_unstable();
    booked.dedup();
    assert_eq!(booked.len(), total, "a seat was sold twice");

    let map = fx.service.get_seat_map(SCREENING).await.unwrap();
    assert_eq!(locked(&map), booked);
}

#[tokio::test]
async fn test_booking_is_pending_with_flat_total() {
    let fx = fixture(3).await;
    let booking = fx.service.create_booking(7, SCREENING, vec![3, 1]).await.unwrap();

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.total_amount, 2000);
    assert_eq!(booking.seat_ids(), vec![3, 1]);
    assert!(booking.seats.iter().all(|s| s.price == 1000 && s.screening_id == SCREENING));
}

#[tokio::test]
async fn test_cancel_frees_seats() {
    let fx = fixture(2).await;
    let booking = fx.service.create_booking(1, SCREENING, vec![1, 2]).await.unwrap();

    let canceled = fx.service.cancel_booking(booking.id).await.unwrap();
    assert_eq!(canceled.status, BookingStatus::Canceled);

    let map = fx.service.get_seat_map(SCREENING).await.unwrap();
    assert!(map.iter().all(|s| s.is_available()));

    assert!(matches!(
        fx.service.cancel_booking(booking.id).await,
        Err(BookingError::Validation(_))
    ));
    fx.service.create_booking(2, SCREENING, vec![1, 2]).await.unwrap();
}

#[tokio::test]
async fn test_confirm_keeps_seats_locked() {
    let fx = fixture(2).await;
    let booking = fx.service.create_booking(1, SCREENING, vec![2]).await.unwrap();

    let confirmed = fx.service.confirm_booking(booking.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    // Confirming twice is harmless.
    fx.service.confirm_booking(booking.id).await.unwrap();

    let map = fx.service.get_seat_map(SCREENING).await.unwrap();
    assert_eq!(locked(&map), vec![2]);

    fx.service.cancel_booking(booking.id).await.unwrap();
    assert!(matches!(
        fx.service.confirm_booking(booking.id).await,
        Err(BookingError::Validation(_))
    ));
    assert!(matches!(
        fx.service.confirm_booking(999).await,
        Err(BookingError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_failed_write_releases_cache_reservation() {
    let fx = fixture(2).await;
    fx.service.get_seat_map(SCREENING).await.unwrap();

    fx.db.fail_next_commit();
    let result = fx.service.create_booking(1, SCREENING, vec![1, 2]).await;
    assert!(matches!(result, Err(BookingError::Failed(_))));

    let map = fx.service.get_seat_map(SCREENING).await.unwrap();
    assert!(map.iter().all(|s| s.is_available()));
    assert!(fx.db.bookings().await.is_empty());
    assert!(!fx.store.contains(&keys::screening_lock(SCREENING)).await);
}

#[tokio::test]
async fn test_abandoned_attempt_releases_its_seats() {
    let fx = fixture(2).await;
    fx.service.get_seat_map(SCREENING).await.unwrap();
    let stalled = service_with(&fx, Arc::new(StalledUnitOfWork));

    // The caller gives up while the booking write hangs.
    let attempt = tokio::time::timeout(
        Duration::from_millis(50),
        stalled.create_booking(1, SCREENING, vec![1]),
    )
    .await;
    assert!(attempt.is_err());

    wait_for_unlock(&fx.store).await;
    let map = fx.service.get_seat_map(SCREENING).await.unwrap();
    assert!(map.iter().all(|s| s.is_available()));
    assert!(fx.db.bookings().await.is_empty());

    let booking = fx.service.create_booking(2, SCREENING, vec![1]).await.unwrap();
    assert_eq!(booking.seat_ids(), vec![1]);
}

#[tokio::test]
async fn test_panicking_attempt_releases_its_seats() {
    let fx = fixture(2).await;
    fx.service.get_seat_map(SCREENING).await.unwrap();
    let crashing = service_with(&fx, Arc::new(CrashingUnitOfWork));

    let joined =
        tokio::spawn(async move { crashing.create_booking(1, SCREENING, vec![1, 2]).await }).await;
    assert!(joined.unwrap_err().is_panic());

    wait_for_unlock(&fx.store).await;
    let map = fx.service.get_seat_map(SCREENING).await.unwrap();
    assert!(map.iter().all(|s| s.is_available()));
    fx.service.create_booking(2, SCREENING, vec![1, 2]).await.unwrap();
}

#[tokio::test]
async fn test_confirm_after_cancel_does_not_revive_booking() {
    let fx = fixture(2).await;
    let booking = fx.service.create_booking(1, SCREENING, vec![1]).await.unwrap();
    fx.service.cancel_booking(booking.id).await.unwrap();

    assert!(matches!(
        fx.service.confirm_booking(booking.id).await,
        Err(BookingError::Validation(_))
    ));
    let stored = fx.db.bookings().await;
    assert_eq!(stored[0].status, BookingStatus::Canceled);

    // The seat belongs to whoever books it next, and to nobody else.
    fx.service.create_booking(2, SCREENING, vec![1]).await.unwrap();
    assert!(matches!(
        fx.service.create_booking(3, SCREENING, vec![1]).await,
        Err(BookingError::SeatUnavailable)
    ));
}

#[tokio::test]
async fn test_durable_constraint_wins_over_stale_cache() {
    let fx = fixture(2).await;
    fx.service.get_seat_map(SCREENING).await.unwrap();

    // Seat 1 sold behind the cache's back.
    let mut tx = fx.db.begin().await.unwrap();
    tx.bookings()
        .create(&NewBooking {
            user_id: 9,
            screening_id: SCREENING,
            seat_ids: vec![1],
            seat_price: 1000,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let result = fx.service.create_booking(1, SCREENING, vec![1, 2]).await;
    assert!(matches!(result, Err(BookingError::SeatUnavailable)));

    let map = fx.service.get_seat_map(SCREENING).await.unwrap();
    assert_eq!(locked(&map), vec![1]);
    fx.service.create_booking(1, SCREENING, vec![2]).await.unwrap();
}

#[tokio::test]
async fn test_busy_screening_asks_to_retry() {
    let fx = fixture(2).await;
    let locks = LockProvider::new(Arc::new(fx.store.clone()));
    let held = locks
        .acquire(&keys::screening_lock(SCREENING), Duration::from_secs(5))
        .await
        .unwrap();

    let result = fx.service.create_booking(1, SCREENING, vec![1]).await;
    assert!(matches!(result, Err(BookingError::TryAgain)));
    assert!(fx.db.bookings().await.is_empty());

    // Seat map is still served, straight from the durable store.
    let map = fx.service.get_seat_map(SCREENING).await.unwrap();
    assert_eq!(map.len(), 2);
    assert!(!fx.store.contains(&keys::seat_layout(SCREENING)).await);

    held.release().await.unwrap();
    fx.service.create_booking(1, SCREENING, vec![1]).await.unwrap();
}

#[tokio::test]
async fn test_lost_cache_is_rebuilt_from_store() {
    let fx = fixture(2).await;
    fx.service.create_booking(1, SCREENING, vec![1]).await.unwrap();

    // Shared store restarted.
    fx.store.evict(&keys::seat_layout(SCREENING)).await;
    fx.store.evict(&keys::seat_bits(SCREENING)).await;

    let result = fx.service.create_booking(2, SCREENING, vec![1]).await;
    assert!(matches!(result, Err(BookingError::SeatUnavailable)));

    fx.store.evict(&keys::seat_bits(SCREENING)).await;
    let map = fx.service.get_seat_map(SCREENING).await.unwrap();
    assert_eq!(locked(&map), vec![1]);
    assert!(fx.store.contains(&keys::seat_bits(SCREENING)).await);
}

#[tokio::test]
async fn test_request_validation() {
    let fx = fixture(5).await;
    let service = &fx.service;

    for seats in [vec![], vec![1, 1], vec![1, 2, 3, 4, 5]] {
        assert!(matches!(
            service.create_booking(1, SCREENING, seats).await,
            Err(BookingError::Validation(_))
        ));
    }
    assert!(matches!(
        service.create_booking(1, 404, vec![1]).await,
        Err(BookingError::NotFound(_))
    ));

    // A seat from another hall leaves nothing reserved behind.
    assert!(matches!(
        service.create_booking(1, SCREENING, vec![1, 77]).await,
        Err(BookingError::Validation(_))
    ));
    let map = service.get_seat_map(SCREENING).await.unwrap();
    assert!(map.iter().all(|s| s.is_available()));
    assert!(!fx.store.contains(&keys::screening_lock(SCREENING)).await);

    fx.db.insert_screening(screening(2, ChronoDuration::minutes(-5))).await;
    assert!(matches!(
        service.create_booking(1, 2, vec![1]).await,
        Err(BookingError::Validation(_))
    ));
}

#[tokio::test]
async fn test_warm_upcoming_screenings() {
    let fx = fixture(3).await;
    fx.db.insert_screening(screening(2, ChronoDuration::days(3))).await;

    let report = fx
        .service
        .warm_upcoming(Utc::now(), ChronoDuration::hours(24))
        .await
        .unwrap();

    assert_eq!(report.warmed, 1);
    assert_eq!(report.skipped + report.failed, 0);
    assert!(fx.store.contains(&keys::seat_bits(SCREENING)).await);
    assert!(!fx.store.contains(&keys::seat_layout(2)).await);
}
