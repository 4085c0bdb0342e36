//! Alert delivery. Reactors only need a fire-and-forget `send`; delivery
//! failures are logged by the sink and never reach the caller.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Operator,
    User(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub recipient: Recipient,
    pub title: String,
    pub body: String,
    pub context: Map<String, Value>,
}

impl Notification {
    #[must_use]
    pub fn operator(severity: Severity, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            severity,
            recipient: Recipient::Operator,
            title: title.into(),
            body: body.into(),
            context: Map::new(),
        }
    }

    #[must_use]
    pub fn user(user_id: &str, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            recipient: Recipient::User(user_id.to_owned()),
            title: title.into(),
            body: body.into(),
            context: Map::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_owned(), value.into());
        self
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification);
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn send(&self, notification: &Notification) {
        let context = Value::Object(notification.context.clone());
        match notification.severity {
            Severity::Critical | Severity::Warning => tracing::warn!(
                severity = %notification.severity,
                recipient = ?notification.recipient,
                %context,
                "{}: {}",
                notification.title,
                notification.body
            ),
            Severity::Info => tracing::info!(
                recipient = ?notification.recipient,
                %context,
                "{}: {}",
                notification.title,
                notification.body
            ),
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<Notification>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn send(&self, notification: &Notification) {
        self.sent.lock().await.push(notification.clone());
    }
}

/// Posts operator notifications to a chat webhook as JSON. User
/// notifications are logged only; per-user delivery channels live elsewhere.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// # Errors
    ///
    /// Returns [`reqwest::Error`] if the HTTP client cannot be built.
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }

    fn payload(notification: &Notification) -> Value {
        json!({
            "text": format!(
                "[{}] {}\n{}",
                notification.severity.to_string().to_uppercase(),
                notification.title,
                notification.body
            ),
            "severity": notification.severity,
            "title": notification.title,
            "body": notification.body,
            "context": notification.context,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, notification: &Notification) {
        if let Recipient::User(user_id) = &notification.recipient {
            tracing::info!(user_id, title = %notification.title, "user notification");
            return;
        }

        let result = self
            .client
            .post(&self.url)
            .json(&Self::payload(notification))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        match result {
            Ok(_) => tracing::debug!(title = %notification.title, "webhook alert delivered"),
            Err(e) => tracing::warn!(
                error = %e,
                title = %notification.title,
                "webhook alert delivery failed"
            ),
        }
    }
}
