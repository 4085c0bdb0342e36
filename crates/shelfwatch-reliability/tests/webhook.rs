//! Integration tests for `WebhookSink` against a `wiremock` server.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shelfwatch_reliability::{Notification, NotificationSink, Severity, WebhookSink};

#[tokio::test]
async fn operator_alert_is_posted_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/ops"))
        .and(body_partial_json(json!({
            "text": "[CRITICAL] Zooplus crawls failing\n3 crawl failures in the last 60 minutes. Latest: HTTP 503",
            "severity": "critical",
            "context": { "retailer": "zooplus", "failure_count": 3 }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sink = WebhookSink::new(&format!("{}/hooks/ops", server.uri()), 5).unwrap();
    let notification = Notification::operator(
        Severity::Critical,
        "Zooplus crawls failing",
        "3 crawl failures in the last 60 minutes. Latest: HTTP 503",
    )
    .with_context("retailer", "zooplus")
    .with_context("failure_count", 3);
    sink.send(&notification).await;
}

#[tokio::test]
async fn user_notifications_are_not_posted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sink = WebhookSink::new(&server.uri(), 5).unwrap();
    sink.send(&Notification::user("user-7", "Price drop", "Now £9.99"))
        .await;
}

#[tokio::test]
async fn delivery_failure_does_not_panic() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let sink = WebhookSink::new(&server.uri(), 5).unwrap();
    sink.send(&Notification::operator(Severity::Warning, "Breaker open", "bm"))
        .await;
}
