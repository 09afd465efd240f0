use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Shared key-value state. The store is the only mutable resource shared
/// between service instances; the compound candle update runs as a single
/// remote atomic operation so no in-process lock is ever held across a call.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically create-or-update an open candle hash: initialize OHLCV on
    /// first trade, otherwise fold in max/min/close/volume, and refresh the
    /// key TTL. One round trip.
    async fn candle_upsert(&self, key: &str, price: f64, volume: f64, ts_ms: i64, ttl_sec: u64) -> Result<()>;

    /// Enumerate keys under a prefix.
    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>>;

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>>;

    async fn hash_put(&self, key: &str, fields: &[(String, String)], ttl_sec: u64) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically prepend to a list, trim it to the newest `keep` entries,
    /// and refresh the key TTL.
    async fn list_prepend_trim(&self, key: &str, value: &str, keep: usize, ttl_sec: u64) -> Result<()>;

    /// Newest-first read of up to `limit` list entries.
    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put_with_ttl(&self, key: &str, value: &str, ttl_sec: u64) -> Result<()>;

    /// Set only when absent, with a TTL. Returns true when the key was newly
    /// written; false when it already existed.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_sec: u64) -> Result<bool>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;
}

/// Topic-addressed message bus. Delivery is at-least-once and per-topic
/// ordering is not assumed.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;
}

/// A push notification channel (Telegram, LINE).
#[async_trait]
pub trait PushChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver `text`. Returns true only when the remote acknowledged with a
    /// 2xx; unconfigured channels and transport failures return false and
    /// never raise.
    async fn send(&self, text: &str) -> bool;
}

/// Generative reasoning oracle used for on-demand trade plans.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Whether calling this oracle can do anything at all.
    fn is_configured(&self) -> bool;

    /// Ask for a JSON document conforming to `contract`, given `context`.
    async fn reason(&self, contract: &str, context: Value) -> Result<Value>;
}
