pub mod backends;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod screening_cache;
pub mod seat_cache;
pub mod warmup;

pub use backends::Backends;
pub use error::{BookingError, BookingResult};
pub use lock::{Lock, LockError, LockProvider};
pub use orchestrator::BookingService;
pub use seat_cache::{SeatAvailabilityCache, SeatCacheError};
pub use warmup::WarmupReport;
