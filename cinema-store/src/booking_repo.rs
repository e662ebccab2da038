use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use cinema_core::error::{StoreError, StoreResult};
use cinema_core::models::{BookedSeat, Booking, BookingStatus, NewBooking};
use cinema_core::repository::{BookingQueries, BookingRepository};

use crate::database::map_db_err;

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    user_id: i64,
    screening_id: i64,
    total_amount: i64,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct BookedSeatRow {
    id: i64,
    booking_id: i64,
    screening_id: i64,
    seat_id: i64,
    price: i64,
}

impl From<BookedSeatRow> for BookedSeat {
    fn from(row: BookedSeatRow) -> Self {
        BookedSeat {
            id: row.id,
            booking_id: row.booking_id,
            screening_id: row.screening_id,
            seat_id: row.seat_id,
            price: row.price,
        }
    }
}

async fn load_booking(conn: &mut PgConnection, id: i64) -> StoreResult<Option<Booking>> {
    let row = sqlx::query_as::<_, BookingRow>(
        "SELECT id, user_id, screening_id, total_amount, status, created_at FROM bookings WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let seats = sqlx::query_as::<_, BookedSeatRow>(
        "SELECT id, booking_id, screening_id, seat_id, price FROM booked_seats WHERE booking_id = $1 ORDER BY id",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_err)?;

    let status = BookingStatus::parse(&row.status)
        .ok_or_else(|| StoreError::Corrupt(format!("Unknown booking status: {}", row.status)))?;

    Ok(Some(Booking {
        id: row.id,
        user_id: row.user_id,
        screening_id: row.screening_id,
        seats: seats.into_iter().map(BookedSeat::from).collect(),
        total_amount: row.total_amount,
        status,
        created_at: row.created_at,
    }))
}

/// Booking reads against the connection pool.
pub struct PgBookingQueries {
    pool: PgPool,
}

impl PgBookingQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingQueries for PgBookingQueries {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Booking>> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        load_booking(&mut *conn, id).await
    }

    async fn active_seat_ids(&self, screening_id: i64) -> StoreResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT seat_id FROM booked_seats WHERE screening_id = $1 AND is_active ORDER BY seat_id",
        )
        .bind(screening_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(ids)
    }
}

/// Booking writes inside an open transaction.
pub struct PgBookingRepository {
    pub(crate) tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn create(&mut self, booking: &NewBooking) -> StoreResult<Booking> {
        let status = BookingStatus::Pending;
        let total_amount = booking.total_amount();

        let booking_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO bookings (user_id, screening_id, total_amount, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(booking.user_id)
        .bind(booking.screening_id)
        .bind(total_amount)
        .bind(status.as_str())
        .bind(booking.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_err)?;

        let mut seats = Vec::with_capacity(booking.seat_ids.len());
        for seat_id in &booking.seat_ids {
            // booked_seats_active_uniq rejects a seat held by another live booking
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO booked_seats (booking_id, screening_id, seat_id, price, is_active)
                VALUES ($1, $2, $3, $4, TRUE)
                RETURNING id
                "#,
            )
            .bind(booking_id)
            .bind(booking.screening_id)
            .bind(*seat_id)
            .bind(booking.seat_price)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_db_err)?;

            seats.push(BookedSeat {
                id,
                booking_id,
                screening_id: booking.screening_id,
                seat_id: *seat_id,
                price: booking.seat_price,
            });
        }

        Ok(Booking {
            id: booking_id,
            user_id: booking.user_id,
            screening_id: booking.screening_id,
            seats,
            total_amount,
            status,
            created_at: booking.created_at,
        })
    }

    async fn find_by_id(&mut self, id: i64) -> StoreResult<Option<Booking>> {
        load_booking(&mut *self.tx, id).await
    }

    async fn transition_status(
        &mut self,
        id: i64,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> StoreResult<bool> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        // The status guard is re-checked after waiting on a concurrent writer's row lock
        let result = sqlx::query("UPDATE bookings SET status = $1 WHERE id = $2 AND status = ANY($3)")
            .bind(to.as_str())
            .bind(id)
            .bind(from)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        if to == BookingStatus::Canceled {
            sqlx::query("UPDATE booked_seats SET is_active = FALSE WHERE booking_id = $1")
                .bind(id)
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_err)?;
        }

        Ok(true)
    }
}
