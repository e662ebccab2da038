//! Per-screening seat availability held in the shared store.
//!
//! A screening's entry is a layout snapshot (the hall's seats in ascending ID
//! order, serialized as JSON) plus a [`SeatBitmap`] addressed by position in
//! that snapshot. Sorting fixes the offsets, so any instance rebuilding the
//! same hall produces a bit-compatible map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use cinema_core::bitmap::SeatBitmap;
use cinema_core::error::StoreError;
use cinema_core::models::{Availability, Seat, SeatStatus};
use cinema_core::store::{BitReservation, SeatStateStore};

#[derive(Debug, thiserror::Error)]
pub enum SeatCacheError {
    #[error("Seat map for screening {0} is not initialized")]
    NotInitialized(i64),

    #[error("Seats already locked: {0:?}")]
    SeatAlreadyLocked(Vec<i64>),

    #[error("Seat {seat_id} is not part of screening {screening_id}")]
    UnknownSeat { screening_id: i64, seat_id: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Orders a hall's seats into snapshot order. Duplicate IDs keep one entry.
pub fn layout_order(seats: &[Seat]) -> Vec<Seat> {
    let mut ordered = seats.to_vec();
    ordered.sort_by_key(|s| s.id);
    ordered.dedup_by_key(|s| s.id);
    ordered
}

/// Statuses for a layout given the set of taken seat IDs.
pub fn seat_statuses(layout: Vec<Seat>, taken: &HashSet<i64>) -> Vec<SeatStatus> {
    layout
        .into_iter()
        .map(|seat| {
            let availability = if taken.contains(&seat.id) {
                Availability::Locked
            } else {
                Availability::Available
            };
            SeatStatus { seat, availability }
        })
        .collect()
}

struct Snapshot {
    seats: Vec<Seat>,
    offsets: HashMap<i64, usize>,
    bitmap: SeatBitmap,
}

impl Snapshot {
    /// `None` when the bitmap is absent or not exactly as wide as the layout.
    fn decode(layout: &str, bits: Option<Vec<u8>>) -> Result<Option<Self>, StoreError> {
        let seats: Vec<Seat> = serde_json::from_str(layout)?;

        // An empty hall has no bitmap to store.
        let bitmap = if seats.is_empty() {
            SeatBitmap::with_len(0)
        } else {
            match bits.and_then(|raw| SeatBitmap::from_stored(seats.len(), &raw)) {
                Some(bitmap) => bitmap,
                None => return Ok(None),
            }
        };

        let offsets = seats.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
        Ok(Some(Self {
            seats,
            offsets,
            bitmap,
        }))
    }
}

#[derive(Clone)]
pub struct SeatAvailabilityCache {
    store: Arc<dyn SeatStateStore>,
}

impl SeatAvailabilityCache {
    pub fn new(store: Arc<dyn SeatStateStore>) -> Self {
        Self { store }
    }

    /// Publishes a fresh snapshot and bitmap for a screening. The caller must
    /// hold the screening's lock. Booked IDs missing from the layout are
    /// ignored.
    pub async fn init_seat_map(
        &self,
        screening_id: i64,
        hall_layout: &[Seat],
        booked_seat_ids: &[i64],
        ttl: Duration,
    ) -> Result<(), SeatCacheError> {
        let seats = layout_order(hall_layout);
        let offsets: HashMap<i64, usize> =
            seats.iter().enumerate().map(|(i, s)| (s.id, i)).collect();

        let mut bitmap = SeatBitmap::with_len(seats.len());
        let mut ignored = 0usize;
        for seat_id in booked_seat_ids {
            match offsets.get(seat_id) {
                Some(offset) => {
                    bitmap.set(*offset);
                }
                None => ignored += 1,
            }
        }

        let snapshot = serde_json::to_string(&seats).map_err(StoreError::from)?;
        self.store
            .write_seat_map(screening_id, &snapshot, bitmap.as_bytes(), ttl)
            .await?;

        debug!(
            screening_id,
            seats = seats.len(),
            booked = bitmap.count_set(),
            ignored,
            "Seat map initialized"
        );
        Ok(())
    }

    /// Seat statuses in snapshot order.
    pub async fn get_seat_map(
        &self,
        screening_id: i64,
    ) -> Result<Vec<SeatStatus>, SeatCacheError> {
        let Snapshot { seats, bitmap, .. } = self.snapshot(screening_id).await?;
        Ok(seats
            .into_iter()
            .enumerate()
            .map(|(offset, seat)| {
                let availability = if bitmap.get(offset) == Some(true) {
                    Availability::Locked
                } else {
                    Availability::Available
                };
                SeatStatus { seat, availability }
            })
            .collect())
    }

    /// Locks every requested seat or none of them.
    pub async fn lock_seats(
        &self,
        screening_id: i64,
        seat_ids: &[i64],
    ) -> Result<(), SeatCacheError> {
        if seat_ids.is_empty() {
            return Ok(());
        }

        let snapshot = self.snapshot(screening_id).await?;
        let offsets = seat_ids
            .iter()
            .map(|seat_id| {
                snapshot
                    .offsets
                    .get(seat_id)
                    .copied()
                    .ok_or(SeatCacheError::UnknownSeat {
                        screening_id,
                        seat_id: *seat_id,
                    })
            })
            .collect::<Result<Vec<usize>, _>>()?;

        match self.store.test_and_set_bits(screening_id, &offsets).await? {
            BitReservation::Reserved => Ok(()),
            BitReservation::Conflict(taken) => {
                let seat_ids = taken
                    .into_iter()
                    .filter_map(|offset| snapshot.seats.get(offset).map(|s| s.id))
                    .collect();
                Err(SeatCacheError::SeatAlreadyLocked(seat_ids))
            }
            BitReservation::Missing => Err(SeatCacheError::NotInitialized(screening_id)),
        }
    }

    /// Marks seats available again. Without a cached map there is nothing to
    /// release; the next rebuild reads the durable store.
    pub async fn release_seats(
        &self,
        screening_id: i64,
        seat_ids: &[i64],
    ) -> Result<(), SeatCacheError> {
        let snapshot = match self.snapshot(screening_id).await {
            Ok(snapshot) => snapshot,
            Err(SeatCacheError::NotInitialized(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let offsets: Vec<usize> = seat_ids
            .iter()
            .filter_map(|seat_id| snapshot.offsets.get(seat_id).copied())
            .collect();
        if offsets.is_empty() {
            return Ok(());
        }

        self.store.clear_bits(screening_id, &offsets).await?;
        Ok(())
    }

    async fn snapshot(&self, screening_id: i64) -> Result<Snapshot, SeatCacheError> {
        let (layout, bits) = self.store.read_seat_map(screening_id).await?;
        let Some(layout) = layout else {
            return Err(SeatCacheError::NotInitialized(screening_id));
        };
        match Snapshot::decode(&layout, bits)? {
            Some(snapshot) => Ok(snapshot),
            None => {
                debug!(screening_id, "Seat bitmap missing or mis-sized");
                Err(SeatCacheError::NotInitialized(screening_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinema_core::models::SeatType;
    use cinema_store::{keys, MemoryStore};

    const TTL: Duration = Duration::from_secs(600);

    fn seat(id: i64) -> Seat {
        Seat {
            id,
            hall_id: 1,
            row: "A".to_string(),
            number: id as i32,
            seat_type: SeatType::Standard,
        }
    }

    fn cache() -> (SeatAvailabilityCache, MemoryStore) {
        let store = MemoryStore::new();
        (SeatAvailabilityCache::new(Arc::new(store.clone())), store)
    }

    fn locked_ids(map: &[SeatStatus]) -> Vec<i64> {
        map.iter()
            .filter(|s| !s.is_available())
            .map(|s| s.seat.id)
            .collect()
    }

    #[tokio::test]
    async fn test_init_orders_layout_and_marks_booked() {
        let (cache, _) = cache();
        let layout = vec![seat(30), seat(10), seat(20)];

        cache.init_seat_map(5, &layout, &[20, 99], TTL).await.unwrap();
        let map = cache.get_seat_map(5).await.unwrap();

        let ids: Vec<i64> = map.iter().map(|s| s.seat.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(locked_ids(&map), vec![20]);
    }

    #[tokio::test]
    async fn test_rebuilds_are_bit_compatible() {
        let (a, store_a) = cache();
        let (b, store_b) = cache();

        a.init_seat_map(1, &[seat(3), seat(1), seat(2)], &[3], TTL).await.unwrap();
        b.init_seat_map(1, &[seat(2), seat(3), seat(1)], &[3], TTL).await.unwrap();

        assert_eq!(
            store_a.read_seat_map(1).await.unwrap(),
            store_b.read_seat_map(1).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_pieces_are_not_initialized() {
        let (cache, store) = cache();
        assert!(matches!(
            cache.get_seat_map(1).await,
            Err(SeatCacheError::NotInitialized(1))
        ));

        cache.init_seat_map(1, &[seat(1)], &[], TTL).await.unwrap();
        store.evict(&keys::seat_bits(1)).await;
        assert!(matches!(
            cache.get_seat_map(1).await,
            Err(SeatCacheError::NotInitialized(1))
        ));
        assert!(matches!(
            cache.lock_seats(1, &[1]).await,
            Err(SeatCacheError::NotInitialized(1))
        ));
    }

    #[tokio::test]
    async fn test_short_bitmap_is_not_initialized() {
        let (cache, store) = cache();
        let layout: Vec<Seat> = (1..=9).map(seat).collect();
        let snapshot = serde_json::to_string(&layout).unwrap();
        store.write_seat_map(1, &snapshot, &[0x00], TTL).await.unwrap();

        assert!(matches!(
            cache.get_seat_map(1).await,
            Err(SeatCacheError::NotInitialized(1))
        ));
        assert!(matches!(
            cache.lock_seats(1, &[9]).await,
            Err(SeatCacheError::NotInitialized(1))
        ));
    }

    #[tokio::test]
    async fn test_lock_is_all_or_nothing() {
        let (cache, _) = cache();
        cache
            .init_seat_map(1, &[seat(1), seat(2), seat(3)], &[], TTL)
            .await
            .unwrap();

        cache.lock_seats(1, &[2]).await.unwrap();
        match cache.lock_seats(1, &[1, 2, 3]).await {
            Err(SeatCacheError::SeatAlreadyLocked(ids)) => assert_eq!(ids, vec![2]),
            other => panic!("unexpected result: {:?}", other),
        }

        let map = cache.get_seat_map(1).await.unwrap();
        assert_eq!(locked_ids(&map), vec![2]);
    }

    #[tokio::test]
    async fn test_unknown_seat_rejected() {
        let (cache, _) = cache();
        cache.init_seat_map(1, &[seat(1)], &[], TTL).await.unwrap();
        assert!(matches!(
            cache.lock_seats(1, &[1, 7]).await,
            Err(SeatCacheError::UnknownSeat { seat_id: 7, .. })
        ));
        // Seat 1 was not reserved by the rejected call.
        cache.lock_seats(1, &[1]).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_restores_availability() {
        let (cache, _) = cache();
        cache.init_seat_map(1, &[seat(1), seat(2)], &[], TTL).await.unwrap();
        cache.lock_seats(1, &[1, 2]).await.unwrap();

        cache.release_seats(1, &[1, 2]).await.unwrap();
        let map = cache.get_seat_map(1).await.unwrap();
        assert!(map.iter().all(|s| s.is_available()));

        // Releasing without a cached map is a no-op.
        cache.release_seats(2, &[1]).await.unwrap();
    }

    #[tokio::test]
    async fn test_reinit_clears_previous_bits() {
        let (cache, _) = cache();
        cache.init_seat_map(1, &[seat(1), seat(2)], &[1, 2], TTL).await.unwrap();
        cache.init_seat_map(1, &[seat(1), seat(2)], &[2], TTL).await.unwrap();

        let map = cache.get_seat_map(1).await.unwrap();
        assert_eq!(locked_ids(&map), vec![2]);
    }

    #[tokio::test]
    async fn test_empty_hall() {
        let (cache, _) = cache();
        cache.init_seat_map(1, &[], &[], TTL).await.unwrap();
        assert!(cache.get_seat_map(1).await.unwrap().is_empty());
    }
}
