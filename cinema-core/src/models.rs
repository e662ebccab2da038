use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled showing of a movie in one hall.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Screening {
    pub id: i64,
    pub movie_id: i64,
    pub hall_id: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Flat price charged for every seat, in minor currency units.
    pub seat_price: i64,
}

impl Screening {
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SeatType {
    Standard,
    Vip,
    Wheelchair,
}

impl SeatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatType::Standard => "standard",
            SeatType::Vip => "vip",
            SeatType::Wheelchair => "wheelchair",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(SeatType::Standard),
            "vip" => Some(SeatType::Vip),
            "wheelchair" => Some(SeatType::Wheelchair),
            _ => None,
        }
    }
}

/// A physical seat in a cinema hall.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub id: i64,
    pub hall_id: i64,
    pub row: String,
    pub number: i32,
    pub seat_type: SeatType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Locked,
}

/// One entry of a screening's seat map, in layout order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatStatus {
    pub seat: Seat,
    pub availability: Availability,
}

impl SeatStatus {
    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }
}

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Canceled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "canceled" => Some(BookingStatus::Canceled),
            _ => None,
        }
    }
}

/// A user's reservation of one or more seats for a screening.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: i64,
    pub user_id: i64,
    pub screening_id: i64,
    pub seats: Vec<BookedSeat>,
    pub total_amount: i64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn seat_ids(&self) -> Vec<i64> {
        self.seats.iter().map(|s| s.seat_id).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookedSeat {
    pub id: i64,
    pub booking_id: i64,
    pub screening_id: i64,
    pub seat_id: i64,
    pub price: i64,
}

/// A booking that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub user_id: i64,
    pub screening_id: i64,
    pub seat_ids: Vec<i64>,
    pub seat_price: i64,
    pub created_at: DateTime<Utc>,
}

impl NewBooking {
    pub fn new(user_id: i64, screening: &Screening, seat_ids: Vec<i64>) -> Self {
        Self {
            user_id,
            screening_id: screening.id,
            seat_ids,
            seat_price: screening.seat_price,
            created_at: Utc::now(),
        }
    }

    /// Flat pricing: every seat costs the screening price.
    pub fn total_amount(&self) -> i64 {
        self.seat_price * self.seat_ids.len() as i64
    }
}
