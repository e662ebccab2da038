use async_trait::async_trait;
use sqlx::PgPool;

use cinema_core::error::{StoreError, StoreResult};
use cinema_core::models::{Seat, SeatType};
use cinema_core::repository::HallRepository;

use crate::database::map_db_err;

pub struct PgHallRepository {
    pool: PgPool,
}

impl PgHallRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SeatRow {
    id: i64,
    hall_id: i64,
    row_label: String,
    number: i32,
    seat_type: String,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        let seat_type = SeatType::parse(&row.seat_type)
            .ok_or_else(|| StoreError::Corrupt(format!("Unknown seat type: {}", row.seat_type)))?;
        Ok(Seat {
            id: row.id,
            hall_id: row.hall_id,
            row: row.row_label,
            number: row.number,
            seat_type,
        })
    }
}

#[async_trait]
impl HallRepository for PgHallRepository {
    async fn seats_for_hall(&self, hall_id: i64) -> StoreResult<Vec<Seat>> {
        let rows = sqlx::query_as::<_, SeatRow>(
            "SELECT id, hall_id, row_label, number, seat_type FROM seats WHERE hall_id = $1 ORDER BY id",
        )
        .bind(hall_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        rows.into_iter().map(Seat::try_from).collect()
    }
}
