use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

use cinema_core::error::{StoreError, StoreResult};
use cinema_core::store::{BitReservation, CacheStore, LeaseStore, SeatStateStore};

use crate::keys;

const EXTEND_IF_OWNER: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("PEXPIRE", KEYS[1], ARGV[2])
    else
        return 0
    end
"#;

const DELETE_IF_OWNER: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

// Reply: {0} reserved, {1, offsets...} conflict, {2} bitmap missing.
const TEST_AND_SET_BITS: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then
        return {2}
    end
    local taken = {1}
    for i = 1, #ARGV do
        if redis.call("GETBIT", KEYS[1], ARGV[i]) == 1 then
            table.insert(taken, tonumber(ARGV[i]))
        end
    end
    if #taken > 1 then
        return taken
    end
    for i = 1, #ARGV do
        redis.call("SETBIT", KEYS[1], ARGV[i], 1)
    end
    return {0}
"#;

const CLEAR_BITS: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then
        return 0
    end
    for i = 1, #ARGV do
        redis.call("SETBIT", KEYS[1], ARGV[i], 0)
    end
    return 1
"#;

/// Redis-backed shared store for locks, seat maps and cached screenings.
#[derive(Clone)]
pub struct RedisClient {
    conn: MultiplexedConnection,
    key_prefix: String,
}

impl RedisClient {
    pub async fn new(connection_string: &str, key_prefix: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis");
        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn map_err(e: redis::RedisError) -> StoreError {
        StoreError::Unavailable(format!("Redis error: {}", e))
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LeaseStore for RedisClient {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();

        // SET NX: Only set if key does not exist
        let result: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(result.is_some())
    }

    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = redis::Script::new(EXTEND_IF_OWNER)
            .key(self.key(key))
            .arg(token)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(extended == 1)
    }

    async fn delete_if_owner(&self, key: &str, token: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(DELETE_IF_OWNER)
            .key(self.key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(deleted == 1)
    }
}

#[async_trait]
impl SeatStateStore for RedisClient {
    async fn write_seat_map(
        &self,
        screening_id: i64,
        snapshot: &str,
        bitmap: &[u8],
        ttl: Duration,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let layout_key = self.key(&keys::seat_layout(screening_id));
        let bits_key = self.key(&keys::seat_bits(screening_id));

        // MULTI/EXEC: snapshot and bitmap become visible together
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(&layout_key)
            .arg(snapshot)
            .arg("PX")
            .arg(millis(ttl))
            .ignore()
            .del(&bits_key)
            .ignore();
        if !bitmap.is_empty() {
            pipe.cmd("SET")
                .arg(&bits_key)
                .arg(bitmap)
                .arg("PX")
                .arg(millis(ttl))
                .ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(Self::map_err)?;

        debug!(screening_id, bytes = bitmap.len(), "Seat map written");
        Ok(())
    }

    async fn read_seat_map(
        &self,
        screening_id: i64,
    ) -> StoreResult<(Option<String>, Option<Vec<u8>>)> {
        let mut conn = self.conn.clone();
        let layout: Option<String> = conn
            .get(self.key(&keys::seat_layout(screening_id)))
            .await
            .map_err(Self::map_err)?;
        let bits: Option<Vec<u8>> = conn
            .get(self.key(&keys::seat_bits(screening_id)))
            .await
            .map_err(Self::map_err)?;
        Ok((layout, bits))
    }

    async fn test_and_set_bits(
        &self,
        screening_id: i64,
        offsets: &[usize],
    ) -> StoreResult<BitReservation> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(TEST_AND_SET_BITS);
        let mut invocation = script.key(self.key(&keys::seat_bits(screening_id)));
        for offset in offsets {
            invocation.arg(*offset as u64);
        }
        let reply: Vec<i64> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        match reply.split_first() {
            Some((0, _)) => Ok(BitReservation::Reserved),
            Some((1, taken)) => Ok(BitReservation::Conflict(
                taken.iter().map(|o| *o as usize).collect(),
            )),
            Some((2, _)) => Ok(BitReservation::Missing),
            _ => Err(StoreError::Corrupt(format!(
                "Unexpected seat reservation reply: {:?}",
                reply
            ))),
        }
    }

    async fn clear_bits(&self, screening_id: i64, offsets: &[usize]) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(CLEAR_BITS);
        let mut invocation = script.key(self.key(&keys::seat_bits(screening_id)));
        for offset in offsets {
            invocation.arg(*offset as u64);
        }
        let _: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisClient {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(self.key(key)).await.map_err(Self::map_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1))
            .await
            .map_err(Self::map_err)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key)).await.map_err(Self::map_err)
    }
}
