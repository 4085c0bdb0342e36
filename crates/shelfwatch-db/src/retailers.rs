//! Database operations for the `retailers` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shelfwatch_core::RetailerConfig;
use shelfwatch_reliability::{RetailerHealth, RetailerRegistry, RetailerStatus, StoreError};
use sqlx::PgPool;

use crate::{backend, DbError};

/// A row from the `retailers` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RetailerRow {
    pub slug: String,
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub status: String,
    /// Latest [`RetailerHealth`] as JSON, if any crawl has been recorded.
    pub health: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetailerRow {
    /// # Errors
    ///
    /// Returns a message naming the unknown status.
    pub fn status(&self) -> Result<RetailerStatus, String> {
        self.status.parse()
    }

    /// `None` when no health has been recorded or the stored JSON no longer
    /// matches [`RetailerHealth`].
    #[must_use]
    pub fn health(&self) -> Option<RetailerHealth> {
        self.health
            .clone()
            .and_then(|h| serde_json::from_value(h).ok())
    }
}

/// Upserts name and base URL for every configured retailer. Status and
/// health are left untouched on existing rows.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any upsert fails.
pub async fn sync_retailers(pool: &PgPool, retailers: &[RetailerConfig]) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    for retailer in retailers {
        sqlx::query(
            "INSERT INTO retailers (slug, name, base_url) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (slug) DO UPDATE \
             SET name = EXCLUDED.name, base_url = EXCLUDED.base_url, updated_at = NOW()",
        )
        .bind(retailer.slug())
        .bind(&retailer.name)
        .bind(&retailer.base_url)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(retailers.len())
}

/// Returns every retailer, ordered by slug.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_retailers(pool: &PgPool) -> Result<Vec<RetailerRow>, DbError> {
    let rows = sqlx::query_as::<_, RetailerRow>(
        "SELECT slug, name, base_url, status, health, created_at, updated_at \
         FROM retailers \
         ORDER BY slug",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct PgRetailerRegistry {
    pool: PgPool,
}

impl PgRetailerRegistry {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetailerRegistry for PgRetailerRegistry {
    async fn status(&self, slug: &str) -> Result<Option<RetailerStatus>, StoreError> {
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM retailers WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        status
            .map(|s| s.parse::<RetailerStatus>().map_err(StoreError::Backend))
            .transpose()
    }

    async fn set_status(&self, slug: &str, status: RetailerStatus) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO retailers (slug, status) VALUES ($1, $2) \
             ON CONFLICT (slug) DO UPDATE SET status = EXCLUDED.status, updated_at = NOW()",
        )
        .bind(slug)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        tracing::info!(retailer = slug, status = %status, "retailer status updated");
        Ok(())
    }

    async fn update_health(&self, slug: &str, health: &RetailerHealth) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO retailers (slug, health) VALUES ($1, $2) \
             ON CONFLICT (slug) DO UPDATE SET health = EXCLUDED.health, updated_at = NOW()",
        )
        .bind(slug)
        .bind(serde_json::to_value(health)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}
