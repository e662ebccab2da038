pub mod bitmap;
pub mod error;
pub mod models;
pub mod repository;
pub mod store;

pub use bitmap::SeatBitmap;
pub use error::{StoreError, StoreResult};
pub use models::{
    Availability, BookedSeat, Booking, BookingStatus, NewBooking, Screening, Seat, SeatStatus,
    SeatType,
};
