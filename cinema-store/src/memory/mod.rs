//! In-process stand-ins for Redis and Postgres.
//!
//! Both honor the atomicity the real backends give: every store operation runs
//! under one lock, and a database transaction holds the database exclusively
//! until it commits or is dropped. Expiry uses `tokio::time`, so tests can
//! drive TTLs with a paused clock.

mod database;
mod store;

pub use database::MemoryDatabase;
pub use store::MemoryStore;
