//! Database operations for the `price_alerts` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shelfwatch_reliability::{PriceAlert, PriceAlertRepository, StoreError};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{backend, DbError};

#[derive(Debug, Clone, sqlx::FromRow)]
struct PriceAlertRow {
    id: Uuid,
    user_id: String,
    listing_id: String,
    target_price_pence: i64,
    active: bool,
    last_notified_at: Option<DateTime<Utc>>,
}

impl From<PriceAlertRow> for PriceAlert {
    fn from(row: PriceAlertRow) -> Self {
        PriceAlert {
            id: row.id,
            user_id: row.user_id,
            listing_id: row.listing_id,
            target_price_pence: row.target_price_pence,
            active: row.active,
            last_notified_at: row.last_notified_at,
        }
    }
}

/// Inserts a new price alert.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_price_alert(pool: &PgPool, alert: &PriceAlert) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO price_alerts \
             (id, user_id, listing_id, target_price_pence, active, last_notified_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(alert.id)
    .bind(&alert.user_id)
    .bind(&alert.listing_id)
    .bind(alert.target_price_pence)
    .bind(alert.active)
    .bind(alert.last_notified_at)
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgPriceAlertRepository {
    pool: PgPool,
}

impl PgPriceAlertRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceAlertRepository for PgPriceAlertRepository {
    async fn active_alerts_for_listing(
        &self,
        listing_id: &str,
    ) -> Result<Vec<PriceAlert>, StoreError> {
        let rows = sqlx::query_as::<_, PriceAlertRow>(
            "SELECT id, user_id, listing_id, target_price_pence, active, last_notified_at \
             FROM price_alerts \
             WHERE listing_id = $1 AND active \
             ORDER BY created_at",
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(PriceAlert::from).collect())
    }

    async fn mark_notified(&self, alert_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE price_alerts SET last_notified_at = $1 WHERE id = $2")
            .bind(at)
            .bind(alert_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
