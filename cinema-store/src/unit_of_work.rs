use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use cinema_core::error::StoreResult;
use cinema_core::repository::{BookingRepository, RepositoryProvider, UnitOfWork};

use crate::booking_repo::PgBookingRepository;
use crate::database::map_db_err;

/// Opens one Postgres transaction per unit of work.
pub struct PgUnitOfWork {
    pool: PgPool,
}

impl PgUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn begin(&self) -> StoreResult<Box<dyn RepositoryProvider>> {
        let tx = self.pool.begin().await.map_err(map_db_err)?;
        Ok(Box::new(PgRepositoryProvider {
            bookings: PgBookingRepository { tx },
        }))
    }
}

/// sqlx rolls the transaction back when this is dropped uncommitted.
pub struct PgRepositoryProvider {
    bookings: PgBookingRepository,
}

#[async_trait]
impl RepositoryProvider for PgRepositoryProvider {
    fn bookings(&mut self) -> &mut dyn BookingRepository {
        &mut self.bookings
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.bookings.tx.commit().await.map_err(map_db_err)?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.bookings.tx.rollback().await.map_err(map_db_err)
    }
}
