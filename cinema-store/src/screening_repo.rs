use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use cinema_core::error::StoreResult;
use cinema_core::models::Screening;
use cinema_core::repository::ScreeningRepository;

use crate::database::map_db_err;

pub struct PgScreeningRepository {
    pool: PgPool,
}

impl PgScreeningRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScreeningRow {
    id: i64,
    movie_id: i64,
    hall_id: i64,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    seat_price: i64,
}

impl From<ScreeningRow> for Screening {
    fn from(row: ScreeningRow) -> Self {
        Screening {
            id: row.id,
            movie_id: row.movie_id,
            hall_id: row.hall_id,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            seat_price: row.seat_price,
        }
    }
}

#[async_trait]
impl ScreeningRepository for PgScreeningRepository {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Screening>> {
        let row = sqlx::query_as::<_, ScreeningRow>(
            "SELECT id, movie_id, hall_id, starts_at, ends_at, seat_price FROM screenings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;

        Ok(row.map(Screening::from))
    }

    async fn list_starting_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Screening>> {
        let rows = sqlx::query_as::<_, ScreeningRow>(
            r#"
            SELECT id, movie_id, hall_id, starts_at, ends_at, seat_price
            FROM screenings
            WHERE starts_at >= $1 AND starts_at < $2
            ORDER BY starts_at
            "#,
        )
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        Ok(rows.into_iter().map(Screening::from).collect())
    }
}
