use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use cinema_core::bitmap::bit_position;
use cinema_core::error::{StoreError, StoreResult};
use cinema_core::store::{BitReservation, CacheStore, LeaseStore, SeatStateStore};

use crate::keys;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
}

impl Inner {
    /// Drops the entry if it has expired, then returns it.
    fn live_entry(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn put(&mut self, key: String, value: Vec<u8>, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }
}

/// Shared-store implementation held in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a key regardless of owner, as a store eviction or restart would.
    pub async fn evict(&self, key: &str) {
        self.inner.lock().await.entries.remove(key);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.live_entry(key).is_some()
    }

    /// Remaining lifetime of a key, if it exists and expires.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut inner = self.inner.lock().await;
        let entry = inner.live_entry(key)?;
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

fn read_bit(bytes: &[u8], offset: usize) -> bool {
    let (byte, mask) = bit_position(offset);
    bytes.get(byte).is_some_and(|b| b & mask != 0)
}

fn write_bit(bytes: &mut Vec<u8>, offset: usize, on: bool) {
    let (byte, mask) = bit_position(offset);
    if bytes.len() <= byte {
        bytes.resize(byte + 1, 0);
    }
    if on {
        bytes[byte] |= mask;
    } else {
        bytes[byte] &= !mask;
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.live_entry(key).is_some() {
            return Ok(false);
        }
        inner.put(key.to_string(), token.as_bytes().to_vec(), ttl);
        Ok(true)
    }

    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.live_entry(key) {
            Some(entry) if entry.value == token.as_bytes() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_owner(&self, key: &str, token: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let owned = inner
            .live_entry(key)
            .is_some_and(|entry| entry.value == token.as_bytes());
        if owned {
            inner.entries.remove(key);
        }
        Ok(owned)
    }
}

#[async_trait]
impl SeatStateStore for MemoryStore {
    async fn write_seat_map(
        &self,
        screening_id: i64,
        snapshot: &str,
        bitmap: &[u8],
        ttl: Duration,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let bits_key = keys::seat_bits(screening_id);
        inner.put(keys::seat_layout(screening_id), snapshot.as_bytes().to_vec(), ttl);
        inner.entries.remove(&bits_key);
        if !bitmap.is_empty() {
            inner.put(bits_key, bitmap.to_vec(), ttl);
        }
        Ok(())
    }

    async fn read_seat_map(
        &self,
        screening_id: i64,
    ) -> StoreResult<(Option<String>, Option<Vec<u8>>)> {
        let mut inner = self.inner.lock().await;
        let layout = match inner.live_entry(&keys::seat_layout(screening_id)) {
            Some(entry) => Some(
                String::from_utf8(entry.value.clone())
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            ),
            None => None,
        };
        let bits = inner
            .live_entry(&keys::seat_bits(screening_id))
            .map(|entry| entry.value.clone());
        Ok((layout, bits))
    }

    async fn test_and_set_bits(
        &self,
        screening_id: i64,
        offsets: &[usize],
    ) -> StoreResult<BitReservation> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.live_entry(&keys::seat_bits(screening_id)) else {
            return Ok(BitReservation::Missing);
        };

        let taken: Vec<usize> = offsets
            .iter()
            .copied()
            .filter(|o| read_bit(&entry.value, *o))
            .collect();
        if !taken.is_empty() {
            return Ok(BitReservation::Conflict(taken));
        }

        for offset in offsets {
            write_bit(&mut entry.value, *offset, true);
        }
        Ok(BitReservation::Reserved)
    }

    async fn clear_bits(&self, screening_id: i64, offsets: &[usize]) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.live_entry(&keys::seat_bits(screening_id)) {
            for offset in offsets {
                write_bit(&mut entry.value, *offset, false);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        match inner.live_entry(key) {
            Some(entry) => String::from_utf8(entry.value.clone())
                .map(Some)
                .map_err(|e| StoreError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .put(key.to_string(), value.as_bytes().to_vec(), ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.lock().await.entries.remove(key);
        Ok(())
    }
}
