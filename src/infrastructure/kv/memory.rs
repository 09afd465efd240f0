//! In-memory KvStore used by tests and single-process runs.
//!
//! A single mutex guards the whole map, so every compound operation is
//! trivially atomic, matching the guarantee the scripted Redis
//! implementation provides remotely.

use crate::domain::ports::KvStore;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum Slot {
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| t > Instant::now()).unwrap_or(true)
    }
}

#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
    failing: AtomicBool,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail, to exercise degraded-store paths.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("kv store unavailable");
        }
        Ok(())
    }

    fn ttl(ttl_sec: u64) -> Option<Instant> {
        Some(Instant::now() + Duration::from_secs(ttl_sec))
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn candle_upsert(&self, key: &str, price: f64, volume: f64, ts_ms: i64, ttl_sec: u64) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let expires_at = Self::ttl(ttl_sec);

        let existing = entries.get(key).filter(|e| e.live()).and_then(|e| match &e.slot {
            Slot::Hash(h) => Some(h.clone()),
            _ => None,
        });

        let mut hash = match existing {
            Some(mut h) => {
                let high: f64 = h.get("high").and_then(|v| v.parse().ok()).unwrap_or(price);
                let low: f64 = h.get("low").and_then(|v| v.parse().ok()).unwrap_or(price);
                let vol: f64 = h.get("volume").and_then(|v| v.parse().ok()).unwrap_or(0.0);
                if price > high {
                    h.insert("high".to_string(), price.to_string());
                }
                if price < low {
                    h.insert("low".to_string(), price.to_string());
                }
                h.insert("close".to_string(), price.to_string());
                h.insert("volume".to_string(), (vol + volume).to_string());
                h
            }
            None => {
                let mut h = HashMap::new();
                h.insert("open".to_string(), price.to_string());
                h.insert("high".to_string(), price.to_string());
                h.insert("low".to_string(), price.to_string());
                h.insert("close".to_string(), price.to_string());
                h.insert("volume".to_string(), volume.to_string());
                h
            }
        };
        hash.insert("last_update_ms".to_string(), ts_ms.to_string());

        entries.insert(key.to_string(), Entry { slot: Slot::Hash(hash), expires_at });
        Ok(())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.live())
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        self.check()?;
        let entries = self.entries.lock().await;
        Ok(entries.get(key).filter(|e| e.live()).and_then(|e| match &e.slot {
            Slot::Hash(h) => Some(h.clone()),
            _ => None,
        }))
    }

    async fn hash_put(&self, key: &str, fields: &[(String, String)], ttl_sec: u64) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let mut hash = match entries.get(key).filter(|e| e.live()).map(|e| e.slot.clone()) {
            Some(Slot::Hash(h)) => h,
            _ => HashMap::new(),
        };
        for (k, v) in fields {
            hash.insert(k.clone(), v.clone());
        }
        entries.insert(
            key.to_string(),
            Entry { slot: Slot::Hash(hash), expires_at: Self::ttl(ttl_sec) },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn list_prepend_trim(&self, key: &str, value: &str, keep: usize, ttl_sec: u64) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let mut list = match entries.get(key).filter(|e| e.live()).map(|e| e.slot.clone()) {
            Some(Slot::List(l)) => l,
            _ => VecDeque::new(),
        };
        list.push_front(value.to_string());
        list.truncate(keep);
        entries.insert(
            key.to_string(),
            Entry { slot: Slot::List(list), expires_at: Self::ttl(ttl_sec) },
        );
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        self.check()?;
        let entries = self.entries.lock().await;
        Ok(match entries.get(key).filter(|e| e.live()).map(|e| &e.slot) {
            Some(Slot::List(l)) => l.iter().take(limit).cloned().collect(),
            _ => Vec::new(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let entries = self.entries.lock().await;
        Ok(entries.get(key).filter(|e| e.live()).and_then(|e| match &e.slot {
            Slot::Str(s) => Some(s.clone()),
            _ => None,
        }))
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl_sec: u64) -> Result<()> {
        self.check()?;
        self.entries.lock().await.insert(
            key.to_string(),
            Entry { slot: Slot::Str(value.to_string()), expires_at: Self::ttl(ttl_sec) },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_sec: u64) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        if entries.get(key).map(|e| e.live()).unwrap_or(false) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry { slot: Slot::Str(value.to_string()), expires_at: Self::ttl(ttl_sec) },
        );
        Ok(true)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let mut set = match entries.get(key).filter(|e| e.live()).map(|e| e.slot.clone()) {
            Some(Slot::Set(s)) => s,
            _ => HashSet::new(),
        };
        set.insert(member.to_string());
        entries.insert(key.to_string(), Entry { slot: Slot::Set(set), expires_at: None });
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        if let Some(Entry { slot: Slot::Set(set), .. }) = entries.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        let entries = self.entries.lock().await;
        Ok(match entries.get(key).filter(|e| e.live()).map(|e| &e.slot) {
            Some(Slot::Set(s)) => {
                let mut members: Vec<String> = s.iter().cloned().collect();
                members.sort();
                members
            }
            _ => Vec::new(),
        })
    }
}
