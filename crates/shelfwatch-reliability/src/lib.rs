//! Crawl lifecycle events and the reactors that keep crawling healthy:
//! circuit breaking, retailer health, failure alerts and price-drop alerts.

pub mod aggregate;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event_log;
pub mod failure_alert;
pub mod health;
pub mod notify;
pub mod price_drop;
pub mod registry;
pub mod store;

pub use aggregate::{apply, CrawlAggregate, CrawlEvent, CrawlState, CrawlStatus, StoredEvent};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerReactor, CircuitSnapshot, WindowEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ReliabilityConfig;
pub use dispatch::{CrawlOutcome, Reactor, ReactorSet, DURATION_KEY};
pub use error::{AggregateError, ReliabilityError, StoreError};
pub use event_log::{EventLog, MemoryEventLog};
pub use failure_alert::{FailureAlertConfig, NotifyCrawlFailureReactor};
pub use health::{
    compute_health, HealthConfig, HealthSample, RetailerHealth, UpdateRetailerHealthReactor,
};
pub use notify::{
    MemorySink, Notification, NotificationSink, Recipient, Severity, TracingSink, WebhookSink,
};
pub use price_drop::{
    detect_price_change, drop_percentage, track_price, ListingPriceDropped,
    MemoryPriceAlertRepository, PriceAlert, PriceAlertRepository, PriceDropConfig,
    PriceDropReactor, PriceDropSummary, PRICE_MEMORY,
};
pub use registry::{MemoryRetailerRegistry, RetailerRegistry, RetailerStatus};
pub use store::{get_json, mark_seen, put_json, update_json, KvStore, MemoryStore, UpdateFn};
