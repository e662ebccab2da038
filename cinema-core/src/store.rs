//! Seams over the shared key-value store.
//!
//! Every method is a single atomic operation against the store. Callers never
//! compose reads and writes on these keys themselves.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Leased keys holding an owner token.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Stores `token` under `key` only if the key is absent.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool>;

    /// Resets the TTL only while the stored value still equals `token`.
    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool>;

    /// Deletes the key only while the stored value still equals `token`.
    async fn delete_if_owner(&self, key: &str, token: &str) -> StoreResult<bool>;
}

/// Outcome of an all-or-nothing bit reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitReservation {
    Reserved,
    /// Offsets that were already set. Nothing was written.
    Conflict(Vec<usize>),
    /// The bitmap does not exist.
    Missing,
}

/// Per-screening seat layout snapshot and status bitmap.
#[async_trait]
pub trait SeatStateStore: Send + Sync {
    /// Replaces snapshot and bitmap together, both expiring after `ttl`.
    async fn write_seat_map(
        &self,
        screening_id: i64,
        snapshot: &str,
        bitmap: &[u8],
        ttl: Duration,
    ) -> StoreResult<()>;

    async fn read_seat_map(&self, screening_id: i64)
        -> StoreResult<(Option<String>, Option<Vec<u8>>)>;

    async fn test_and_set_bits(
        &self,
        screening_id: i64,
        offsets: &[usize],
    ) -> StoreResult<BitReservation>;

    /// Clears bits of an existing bitmap. A missing bitmap is left missing.
    async fn clear_bits(&self, screening_id: i64, offsets: &[usize]) -> StoreResult<()>;
}

/// Plain string cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}
