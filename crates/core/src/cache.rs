//! Two-tier result cache.
//!
//! L1 is a bounded in-process LRU behind a `Mutex`; L2 is a SQLite table
//! shared across processes. Reads check L1, then L2 (promoting hits back
//! into L1). Expiry is lazy: an entry past its deadline is treated as
//! absent on read and removed. Every cache failure degrades to a miss.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{CacheError, RetrievalError};

/// Derive a stable cache key from a namespace prefix and request arguments.
///
/// The arguments are serialized as JSON and hashed; `serde_json` keeps map
/// keys sorted, so structurally equal arguments always produce the same key.
pub fn cache_key(prefix: &str, args: &serde_json::Value) -> String {
    let canonical = args.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{prefix}:{digest:x}")
}

/// A value read back from a cache tier, with its expiry deadline.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Durable second-tier store.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError>;
    fn set(&self, key: &str, entry: &StoredEntry) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
    /// Remove every entry whose key starts with `prefix`.
    fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// SQLite-backed [`CacheStore`].
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_store (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_store (expires_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT value, expires_at FROM cache_store WHERE key = ?1",
                params![key],
                |row| {
                    let value: String = row.get(0)?;
                    let expires_millis: i64 = row.get(1)?;
                    Ok((value, expires_millis))
                },
            )
            .optional()?;
        Ok(row.map(|(value, expires_millis)| StoredEntry {
            value,
            expires_at: DateTime::from_timestamp_millis(expires_millis).unwrap_or_default(),
        }))
    }

    fn set(&self, key: &str, entry: &StoredEntry) -> Result<(), CacheError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO cache_store (key, value, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
            params![
                key,
                entry.value,
                Utc::now().timestamp_millis(),
                entry.expires_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let conn = self.lock();
        conn.execute("DELETE FROM cache_store WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let conn = self.lock();
        let pattern = format!(
            "{}%",
            prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let removed = conn.execute(
            "DELETE FROM cache_store WHERE key LIKE ?1 ESCAPE '\\'",
            params![pattern],
        )?;
        Ok(removed as u64)
    }
}

struct LruTier {
    capacity: usize,
    entries: HashMap<String, StoredEntry>,
    // Recency order, last element is most recently used.
    recency: Vec<String>,
}

impl LruTier {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            recency: Vec::new(),
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            let key = self.recency.remove(pos);
            self.recency.push(key);
        }
    }

    fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<StoredEntry> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                self.remove(key);
                None
            }
            Some(entry) => {
                let entry = entry.clone();
                self.touch(key);
                Some(entry)
            }
            None => None,
        }
    }

    fn insert(&mut self, key: String, entry: StoredEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), entry).is_some() {
            self.touch(&key);
        } else {
            self.recency.push(key);
        }
        while self.entries.len() > self.capacity {
            let evicted = self.recency.remove(0);
            self.entries.remove(&evicted);
        }
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            if let Some(pos) = self.recency.iter().position(|k| k == key) {
                self.recency.remove(pos);
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }
}

/// L1 LRU over a durable L2 [`CacheStore`].
pub struct TieredCache<S> {
    l1: Mutex<LruTier>,
    l2: S,
}

impl<S: CacheStore> TieredCache<S> {
    pub fn new(l1_capacity: usize, l2: S) -> Self {
        Self {
            l1: Mutex::new(LruTier::new(l1_capacity)),
            l2,
        }
    }

    fn l1(&self) -> std::sync::MutexGuard<'_, LruTier> {
        self.l1.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up `key`, checking L1 then L2. An L2 hit is promoted into L1.
    pub fn get_raw(&self, key: &str) -> Option<String> {
        let now = Utc::now();
        if let Some(entry) = self.l1().get(key, now) {
            return Some(entry.value);
        }

        match self.l2.get(key) {
            Ok(Some(entry)) if entry.is_expired(now) => {
                if let Err(err) = self.l2.remove(key) {
                    warn!(key, error = %err, "failed to drop expired cache entry");
                }
                None
            }
            Ok(Some(entry)) => {
                self.l1().insert(key.to_string(), entry.clone());
                Some(entry.value)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write `value` to both tiers with the given time-to-live.
    pub fn set_raw(&self, key: &str, value: String, ttl: Duration) {
        let entry = StoredEntry {
            value,
            expires_at: Utc::now() + ttl,
        };
        if let Err(err) = self.l2.set(key, &entry) {
            warn!(key, error = %err, "cache write failed");
        }
        self.l1().insert(key.to_string(), entry);
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "cached value failed to decode, dropping");
                self.l1().remove(key);
                if let Err(err) = self.l2.remove(key) {
                    warn!(key, error = %err, "failed to drop undecodable cache entry");
                }
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, raw, ttl),
            Err(err) => warn!(key, error = %err, "value failed to serialize, not cached"),
        }
    }

    /// Drop every entry under `prefix` from L2 and clear L1 wholesale.
    ///
    /// L1 is cleared in full because its index is keyed by exact key only;
    /// a coarse clear is correct and the tier refills on demand.
    pub fn invalidate(&self, prefix: &str) -> u64 {
        self.l1().clear();
        match self.l2.invalidate_prefix(prefix) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(prefix, error = %err, "cache invalidation failed");
                0
            }
        }
    }

    /// Return the cached value for `key`, or run `compute`, cache its
    /// output, and return it. Compute errors pass through uncached.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, RetrievalError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RetrievalError>>,
    {
        if let Some(hit) = self.get::<T>(key) {
            return Ok(hit);
        }
        let value = compute().await?;
        self.set(key, &value, ttl);
        Ok(value)
    }
}
