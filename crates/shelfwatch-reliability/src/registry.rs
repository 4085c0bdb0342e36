use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::health::RetailerHealth;

/// Operational status of a retailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetailerStatus {
    Active,
    /// Disabled by an operator.
    Paused,
    /// Disabled by the circuit breaker; only the breaker leaves this state.
    CircuitOpen,
}

impl RetailerStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RetailerStatus::Active => "active",
            RetailerStatus::Paused => "paused",
            RetailerStatus::CircuitOpen => "circuit_open",
        }
    }

    #[must_use]
    pub fn allows_crawling(self) -> bool {
        self == RetailerStatus::Active
    }
}

impl fmt::Display for RetailerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetailerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RetailerStatus::Active),
            "paused" => Ok(RetailerStatus::Paused),
            "circuit_open" => Ok(RetailerStatus::CircuitOpen),
            other => Err(format!("unknown retailer status '{other}'")),
        }
    }
}

/// Retailer records as seen by the reliability layer, keyed by slug.
#[async_trait]
pub trait RetailerRegistry: Send + Sync {
    /// `None` for a retailer the registry has never seen.
    async fn status(&self, slug: &str) -> Result<Option<RetailerStatus>, StoreError>;

    async fn set_status(&self, slug: &str, status: RetailerStatus) -> Result<(), StoreError>;

    async fn update_health(&self, slug: &str, health: &RetailerHealth) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct RetailerRecord {
    status: RetailerStatus,
    health: Option<RetailerHealth>,
}

/// In-process [`RetailerRegistry`]. Unknown slugs are created as `Active` on
/// first write.
#[derive(Debug, Default)]
pub struct MemoryRetailerRegistry {
    retailers: Mutex<HashMap<String, RetailerRecord>>,
}

impl MemoryRetailerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `slug` as `Active` unless it is already known.
    pub async fn register(&self, slug: &str) {
        self.retailers
            .lock()
            .await
            .entry(slug.to_owned())
            .or_insert(RetailerRecord {
                status: RetailerStatus::Active,
                health: None,
            });
    }

    pub async fn health(&self, slug: &str) -> Option<RetailerHealth> {
        self.retailers
            .lock()
            .await
            .get(slug)
            .and_then(|r| r.health.clone())
    }
}

#[async_trait]
impl RetailerRegistry for MemoryRetailerRegistry {
    async fn status(&self, slug: &str) -> Result<Option<RetailerStatus>, StoreError> {
        Ok(self.retailers.lock().await.get(slug).map(|r| r.status))
    }

    async fn set_status(&self, slug: &str, status: RetailerStatus) -> Result<(), StoreError> {
        self.retailers
            .lock()
            .await
            .entry(slug.to_owned())
            .and_modify(|r| r.status = status)
            .or_insert(RetailerRecord {
                status,
                health: None,
            });
        Ok(())
    }

    async fn update_health(&self, slug: &str, health: &RetailerHealth) -> Result<(), StoreError> {
        self.retailers
            .lock()
            .await
            .entry(slug.to_owned())
            .and_modify(|r| r.health = Some(health.clone()))
            .or_insert(RetailerRecord {
                status: RetailerStatus::Active,
                health: Some(health.clone()),
            });
        Ok(())
    }
}
