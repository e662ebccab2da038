use std::sync::Arc;

use cinema_core::repository::{BookingQueries, HallRepository, ScreeningRepository, UnitOfWork};
use cinema_core::store::{CacheStore, LeaseStore, SeatStateStore};
use cinema_store::{
    DbClient, MemoryDatabase, MemoryStore, PgBookingQueries, PgHallRepository,
    PgScreeningRepository, PgUnitOfWork, RedisClient,
};

/// The shared store and durable store the booking core runs against.
#[derive(Clone)]
pub struct Backends {
    pub leases: Arc<dyn LeaseStore>,
    pub seat_state: Arc<dyn SeatStateStore>,
    pub cache: Arc<dyn CacheStore>,
    pub screenings: Arc<dyn ScreeningRepository>,
    pub halls: Arc<dyn HallRepository>,
    pub bookings: Arc<dyn BookingQueries>,
    pub unit_of_work: Arc<dyn UnitOfWork>,
}

impl Backends {
    pub fn redis_postgres(redis: RedisClient, db: &DbClient) -> Self {
        let redis = Arc::new(redis);
        Self {
            leases: redis.clone(),
            seat_state: redis.clone(),
            cache: redis,
            screenings: Arc::new(PgScreeningRepository::new(db.pool.clone())),
            halls: Arc::new(PgHallRepository::new(db.pool.clone())),
            bookings: Arc::new(PgBookingQueries::new(db.pool.clone())),
            unit_of_work: Arc::new(PgUnitOfWork::new(db.pool.clone())),
        }
    }

    pub fn in_memory(store: MemoryStore, db: MemoryDatabase) -> Self {
        let store = Arc::new(store);
        let db = Arc::new(db);
        Self {
            leases: store.clone(),
            seat_state: store.clone(),
            cache: store,
            screenings: db.clone(),
            halls: db.clone(),
            bookings: db.clone(),
            unit_of_work: db,
        }
    }
}
