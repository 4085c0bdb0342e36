//! Stores, sinks and reactors for one CLI invocation.
//!
//! With `DATABASE_URL` set everything is Postgres-backed and shared between
//! runs; without it the CLI falls back to in-memory stores that live only as
//! long as the process.

use std::sync::Arc;

use shelfwatch_core::{AppConfig, RetailersFile};
use shelfwatch_reliability::{
    CircuitBreakerReactor, Clock, EventLog, KvStore, MemoryEventLog, MemoryPriceAlertRepository,
    MemoryRetailerRegistry, MemoryStore, NotificationSink, NotifyCrawlFailureReactor,
    PriceAlertRepository, PriceDropReactor, ReactorSet, ReliabilityConfig, RetailerRegistry,
    SystemClock, TracingSink, UpdateRetailerHealthReactor, WebhookSink,
};
use sqlx::PgPool;

pub(crate) struct Stores {
    pub pool: Option<PgPool>,
    pub store: Arc<dyn KvStore>,
    pub log: Arc<dyn EventLog>,
    pub registry: Arc<dyn RetailerRegistry>,
    pub alerts: Arc<dyn PriceAlertRepository>,
}

impl Stores {
    /// Process-local stores with every configured retailer registered as
    /// `Active`.
    pub(crate) async fn in_memory(clock: Arc<dyn Clock>, retailers: &RetailersFile) -> Self {
        let registry = Arc::new(MemoryRetailerRegistry::new());
        for retailer in &retailers.retailers {
            registry.register(&retailer.slug()).await;
        }
        Self {
            pool: None,
            store: Arc::new(MemoryStore::new(clock)),
            log: Arc::new(MemoryEventLog::new()),
            registry,
            alerts: Arc::new(MemoryPriceAlertRepository::new()),
        }
    }

    /// Connects, migrates and syncs the configured retailers into Postgres.
    pub(crate) async fn postgres(
        database_url: &str,
        config: &AppConfig,
        retailers: &RetailersFile,
    ) -> anyhow::Result<Self> {
        let pool_config = shelfwatch_db::PoolConfig::from_app_config(config);
        let pool = shelfwatch_db::connect_pool(database_url, pool_config).await?;
        let applied = shelfwatch_db::run_migrations(&pool).await?;
        if applied > 0 {
            tracing::info!(applied, "database migrations applied");
        }
        shelfwatch_db::sync_retailers(&pool, &retailers.retailers).await?;

        Ok(Self {
            store: Arc::new(shelfwatch_db::PgKvStore::new(pool.clone())),
            log: Arc::new(shelfwatch_db::PgEventLog::new(pool.clone())),
            registry: Arc::new(shelfwatch_db::PgRetailerRegistry::new(pool.clone())),
            alerts: Arc::new(shelfwatch_db::PgPriceAlertRepository::new(pool.clone())),
            pool: Some(pool),
        })
    }
}

/// Everything the commands need, fully wired.
pub(crate) struct Backend {
    pub pool: Option<PgPool>,
    pub store: Arc<dyn KvStore>,
    pub registry: Arc<dyn RetailerRegistry>,
    pub clock: Arc<dyn Clock>,
    pub breaker: Arc<CircuitBreakerReactor>,
    pub health: Arc<UpdateRetailerHealthReactor>,
    pub reactors: ReactorSet,
}

impl Backend {
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached or migrated, or the
    /// webhook client cannot be built.
    pub(crate) async fn connect(
        config: &AppConfig,
        retailers: &RetailersFile,
    ) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let stores = match &config.database_url {
            Some(url) => Stores::postgres(url, config, retailers).await?,
            None => {
                tracing::warn!("DATABASE_URL is not set; breaker and health state will not persist");
                Stores::in_memory(Arc::clone(&clock), retailers).await
            }
        };
        let sink = build_sink(config)?;
        Ok(Self::assemble(
            stores,
            clock,
            sink,
            ReliabilityConfig::from_app_config(config),
        ))
    }

    pub(crate) fn assemble(
        stores: Stores,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        config: ReliabilityConfig,
    ) -> Self {
        let breaker = Arc::new(
            CircuitBreakerReactor::new(
                Arc::clone(&stores.store),
                Arc::clone(&stores.registry),
                Arc::clone(&clock),
                config.circuit,
            )
            .with_sink(Arc::clone(&sink)),
        );
        let health = Arc::new(UpdateRetailerHealthReactor::new(
            Arc::clone(&stores.store),
            Arc::clone(&stores.registry),
            Arc::clone(&clock),
            config.health,
        ));
        let failure_alert = Arc::new(NotifyCrawlFailureReactor::new(
            Arc::clone(&stores.store),
            Arc::clone(&sink),
            config.failure_alert,
        ));
        let price_drop = Arc::new(PriceDropReactor::new(
            Arc::clone(&stores.store),
            stores.alerts,
            sink,
            Arc::clone(&clock),
            config.price_drop,
        ));

        let reactors = ReactorSet::new(stores.log)
            .with_reactor(breaker.clone())
            .with_reactor(health.clone())
            .with_reactor(failure_alert)
            .with_price_drop(price_drop);

        Self {
            pool: stores.pool,
            store: stores.store,
            registry: stores.registry,
            clock,
            breaker,
            health,
            reactors,
        }
    }

    /// Drops expired key-value rows after a run. Postgres only expires keys
    /// lazily on read, so without this the table keeps every dead window and
    /// dedup marker. A failure is logged and otherwise ignored.
    pub(crate) async fn purge_expired(&self) {
        let Some(pool) = &self.pool else {
            return;
        };
        match shelfwatch_db::PgKvStore::new(pool.clone()).purge_expired().await {
            Ok(removed) => tracing::debug!(removed, "expired keys purged"),
            Err(e) => tracing::warn!(error = %e, "failed to purge expired keys"),
        }
    }
}

fn build_sink(config: &AppConfig) -> anyhow::Result<Arc<dyn NotificationSink>> {
    match &config.alert_webhook_url {
        Some(url) => {
            let sink = WebhookSink::new(url, config.scraper_request_timeout_secs)
                .map_err(|e| anyhow::anyhow!("failed to build webhook client: {e}"))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(TracingSink)),
    }
}
