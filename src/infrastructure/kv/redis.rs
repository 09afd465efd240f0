//! Redis-backed KvStore.
//!
//! The open-candle update runs as a Lua script so concurrent trade delivery
//! for the same minute stays consistent without any client-side locking.
//! List appends use an atomic MULTI pipeline (prepend + trim + expire).

use crate::domain::ports::KvStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use tracing::info;

const LUA_CANDLE_UPSERT: &str = r#"
local key = KEYS[1]
local price = tonumber(ARGV[1])
local vol = tonumber(ARGV[2])
local ts_ms = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

if redis.call("EXISTS", key) == 0 then
  redis.call("HSET", key,
    "open", price,
    "high", price,
    "low", price,
    "close", price,
    "volume", vol,
    "last_update_ms", ts_ms
  )
else
  local high = tonumber(redis.call("HGET", key, "high"))
  local low  = tonumber(redis.call("HGET", key, "low"))
  if price > high then
    redis.call("HSET", key, "high", price)
  end
  if price < low then
    redis.call("HSET", key, "low", price)
  end
  redis.call("HSET", key, "close", price)
  redis.call("HINCRBYFLOAT", key, "volume", vol)
  redis.call("HSET", key, "last_update_ms", ts_ms)
end

redis.call("EXPIRE", key, ttl)
return 1
"#;

pub struct RedisKvStore {
    conn: ConnectionManager,
    candle_script: Script,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid redis url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to redis")?;
        info!("Connected to redis at {}", url);
        Ok(Self {
            conn,
            candle_script: Script::new(LUA_CANDLE_UPSERT),
        })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn candle_upsert(&self, key: &str, price: f64, volume: f64, ts_ms: i64, ttl_sec: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .candle_script
            .key(key)
            .arg(price)
            .arg(volume)
            .arg(ts_ms)
            .arg(ttl_sec)
            .invoke_async(&mut conn)
            .await
            .context("Candle upsert script failed")?;
        Ok(())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(2000)
                .query_async(&mut conn)
                .await
                .context("SCAN failed")?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await.context("HGETALL failed")?;
        Ok(if fields.is_empty() { None } else { Some(fields) })
    }

    async fn hash_put(&self, key: &str, fields: &[(String, String)], ttl_sec: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_sec as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("HSET pipeline failed")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.context("DEL failed")?;
        Ok(())
    }

    async fn list_prepend_trim(&self, key: &str, value: &str, keep: usize, ttl_sec: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .lpush(key, value)
            .ignore()
            .ltrim(key, 0, keep as isize - 1)
            .ignore()
            .expire(key, ttl_sec as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("LPUSH pipeline failed")?;
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn
            .lrange(key, 0, limit as isize - 1)
            .await
            .context("LRANGE failed")?;
        Ok(items)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.context("GET failed")?;
        Ok(value)
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl_sec: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_sec).await.context("SETEX failed")?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_sec: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_sec)
            .query_async(&mut conn)
            .await
            .context("SET NX failed")?;
        Ok(reply.is_some())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await.context("SADD failed")?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await.context("SREM failed")?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut members: Vec<String> = conn.smembers(key).await.context("SMEMBERS failed")?;
        members.sort();
        Ok(members)
    }
}
