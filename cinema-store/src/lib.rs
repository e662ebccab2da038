pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod hall_repo;
pub mod keys;
pub mod memory;
pub mod redis_repo;
pub mod screening_repo;
pub mod unit_of_work;

pub use booking_repo::PgBookingQueries;
pub use database::DbClient;
pub use hall_repo::PgHallRepository;
pub use memory::{MemoryDatabase, MemoryStore};
pub use redis_repo::RedisClient;
pub use screening_repo::PgScreeningRepository;
pub use unit_of_work::PgUnitOfWork;
