//! Postgres-backed [`KvStore`] over the `kv_store` table.
//!
//! Expiry is evaluated against the database clock. Expired rows are ignored
//! on read and overwritten on write; [`PgKvStore::purge_expired`] reclaims
//! them.

use async_trait::async_trait;
use chrono::TimeDelta;
use serde_json::Value;
use shelfwatch_reliability::{KvStore, StoreError, UpdateFn};
use sqlx::{PgPool, Postgres, Transaction};

use crate::backend;

#[allow(clippy::cast_precision_loss)]
fn ttl_seconds(ttl: Option<TimeDelta>) -> Option<f64> {
    ttl.map(|t| t.num_milliseconds() as f64 / 1000.0)
}

async fn write(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
    value: Option<&Value>,
    ttl: Option<TimeDelta>,
) -> Result<(), sqlx::Error> {
    match value {
        Some(value) => {
            sqlx::query(
                "INSERT INTO kv_store (key, value, expires_at, updated_at) \
                 VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'), NOW()) \
                 ON CONFLICT (key) DO UPDATE \
                 SET value = EXCLUDED.value, \
                     expires_at = EXCLUDED.expires_at, \
                     updated_at = NOW()",
            )
            .bind(key)
            .bind(value)
            .bind(ttl_seconds(ttl))
            .execute(&mut **tx)
            .await?;
        }
        None => {
            sqlx::query("DELETE FROM kv_store WHERE key = $1")
                .bind(key)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgKvStore {
    pool: PgPool,
}

impl PgKvStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes expired rows. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        sqlx::query_scalar::<_, Value>(
            "SELECT value FROM kv_store \
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<TimeDelta>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        write(&mut tx, key, Some(&value), ttl)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }

    async fn forget(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        ttl: Option<TimeDelta>,
        apply: UpdateFn<'_>,
    ) -> Result<Option<Value>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Serializes updates of one key even when no row exists yet, which a
        // row lock alone cannot do.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let current = sqlx::query_scalar::<_, Value>(
            "SELECT value FROM kv_store \
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW()) \
             FOR UPDATE",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let next = apply(current);
        write(&mut tx, key, next.as_ref(), ttl)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(next)
    }
}
