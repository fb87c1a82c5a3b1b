//! Cache entry storage.
//!
//! The in-process [`MemoryCacheStore`] is the default. A shared backend can be
//! plugged in behind [`CacheStore`] to let several instances share entries;
//! single-flight coordination stays per process either way.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::key::CacheKey;
use crate::error::Result;

/// Storage for cached JSON values with absolute expiry.
///
/// An entry is live while `now < expires_at`. `get` must not return expired
/// entries; it may remove them.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<Value>>;

    async fn put(&self, key: CacheKey, value: Value, expires_at: DateTime<Utc>) -> Result<()>;

    /// Returns whether an entry was removed.
    async fn remove(&self, key: &CacheKey) -> Result<bool>;

    /// Remove every entry expired at `now`; returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Entries currently held, live or not yet purged.
    async fn len(&self) -> Result<usize>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Process-local store with lazy expiry on read.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<CacheKey, StoredEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<Value>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        // Another writer may have replaced the entry in between.
        if let Some(entry) = entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
            entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: CacheKey, value: Value, expires_at: DateTime<Utc>) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key, StoredEntry { value, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
