//! Key-value store with per-key TTL, the only state shared between crawl
//! jobs.
//!
//! Expiry is load-bearing: tracking windows and open-circuit flags clear
//! themselves when no new events arrive.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::StoreError;

/// Read-modify-write callback for [`KvStore::update`]. Receives the live
/// value (`None` when absent or expired) and returns the value to store;
/// returning `None` deletes the key.
pub type UpdateFn<'a> = &'a (dyn Fn(Option<Value>) -> Option<Value> + Send + Sync);

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Stores `value`, replacing any previous value and TTL. `None` never
    /// expires.
    async fn put(&self, key: &str, value: Value, ttl: Option<TimeDelta>) -> Result<(), StoreError>;

    async fn forget(&self, key: &str) -> Result<(), StoreError>;

    /// Applies `apply` to the current value atomically with respect to other
    /// updates of the same key, writing the result with a fresh `ttl`.
    ///
    /// Returns the value that was written.
    async fn update(
        &self,
        key: &str,
        ttl: Option<TimeDelta>,
        apply: UpdateFn<'_>,
    ) -> Result<Option<Value>, StoreError>;
}

/// Typed [`KvStore::get`]. A value that no longer deserializes as `T` is
/// reported as a serialization error.
///
/// # Errors
///
/// Returns [`StoreError`] if the backend fails or the stored value has the
/// wrong shape.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed [`KvStore::put`].
///
/// # Errors
///
/// Returns [`StoreError`] if `value` cannot be serialized or the backend fails.
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<TimeDelta>,
) -> Result<(), StoreError> {
    store.put(key, serde_json::to_value(value)?, ttl).await
}

/// Typed [`KvStore::update`]. A stored value of the wrong shape is handed to
/// `apply` as `None`, so a corrupt window starts over instead of wedging.
///
/// # Errors
///
/// Returns [`StoreError`] if the backend fails.
pub async fn update_json<T, F>(
    store: &dyn KvStore,
    key: &str,
    ttl: Option<TimeDelta>,
    apply: F,
) -> Result<Option<T>, StoreError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(Option<T>) -> Option<T> + Send + Sync,
{
    let key_owned = key.to_owned();
    let raw = move |current: Option<Value>| {
        let typed = current.and_then(|v| match serde_json::from_value::<T>(v) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(key = %key_owned, error = %e, "discarding malformed store value");
                None
            }
        });
        apply(typed).and_then(|t| serde_json::to_value(t).ok())
    };
    let written = store.update(key, ttl, &raw).await?;
    written
        .map(serde_json::from_value)
        .transpose()
        .map_err(StoreError::from)
}

/// Records that `key` has been seen. Returns `true` only for the first
/// caller within `ttl`, which makes it an idempotency guard for at-least-once
/// event delivery.
///
/// # Errors
///
/// Returns [`StoreError`] if the backend fails.
pub async fn mark_seen(store: &dyn KvStore, key: &str, ttl: TimeDelta) -> Result<bool, StoreError> {
    let seen_before = store
        .update(key, Some(ttl), &|current| Some(Value::Bool(current.is_some())))
        .await?;
    Ok(seen_before != Some(Value::Bool(true)))
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`KvStore`]. Expiry is evaluated lazily against the injected
/// clock on every access.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Expiry of a live key; `Some(None)` means it never expires.
    pub async fn expires_at(&self, key: &str) -> Option<Option<DateTime<Utc>>> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at)
    }

    fn expiry(&self, ttl: Option<TimeDelta>) -> Option<DateTime<Utc>> {
        ttl.map(|ttl| self.clock.now() + ttl)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<TimeDelta>) -> Result<(), StoreError> {
        let expires_at = self.expiry(ttl);
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), Entry { value, expires_at });
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        ttl: Option<TimeDelta>,
        apply: UpdateFn<'_>,
    ) -> Result<Option<Value>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone());

        match apply(current) {
            Some(value) => {
                entries.insert(
                    key.to_owned(),
                    Entry {
                        value: value.clone(),
                        expires_at: ttl.map(|ttl| now + ttl),
                    },
                );
                Ok(Some(value))
            }
            None => {
                entries.remove(key);
                Ok(None)
            }
        }
    }
}
