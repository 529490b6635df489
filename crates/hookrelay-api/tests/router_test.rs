//! Router tests over in-memory repositories.
//!
//! Each request goes through the full middleware stack via `oneshot`; the
//! delivery engine uses a stub sender so no network is involved.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use axum::body::Body;
use chrono::Duration as ChronoDuration;
use hookrelay_api::{create_router, AppState};
use hookrelay_core::{
    models::{EventStatus, NewEvent, NewSubscription},
    storage::{memory::MemoryStorage, SubscriptionRepository},
    Clock, EventId, Subscription, TestClock, WebhookEvent,
};
use hookrelay_delivery::{
    client::{DeliveryOutcome, WebhookSender},
    DeliveryConfig, DeliveryEngine,
};
use http::{header, HeaderMap, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

struct StubSender {
    status: u16,
}

impl WebhookSender for StubSender {
    fn send<'a>(
        &'a self,
        _subscription: &'a Subscription,
        _event: &'a WebhookEvent,
    ) -> Pin<Box<dyn Future<Output = DeliveryOutcome> + Send + 'a>> {
        let outcome =
            DeliveryOutcome::responded(self.status, "stub".to_string(), Duration::from_millis(5));
        Box::pin(async move { outcome })
    }
}

struct TestApp {
    state: AppState,
    storage: MemoryStorage,
    clock: TestClock,
}

impl TestApp {
    fn new() -> Self {
        Self::with_receiver_status(200)
    }

    fn with_receiver_status(status: u16) -> Self {
        let storage = MemoryStorage::new();
        let clock = TestClock::new();
        let engine = Arc::new(DeliveryEngine::new(
            Arc::new(storage.clone()),
            Arc::new(storage.clone()),
            Arc::new(StubSender { status }),
            DeliveryConfig::default(),
            Arc::new(clock.clone()),
        ));
        let state = AppState::new(
            Arc::new(storage.clone()),
            Arc::new(storage.clone()),
            engine,
            Arc::new(clock.clone()),
        );
        Self { state, storage, clock }
    }

    async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let app = create_router(self.state.clone(), Duration::from_secs(30));
        let response = app.oneshot(request).await.expect("failed to make request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body should be JSON")
        };

        TestResponse { status, headers, body }
    }

    async fn subscription(&self, retry_limit: i32) -> Subscription {
        let mut new = NewSubscription::new("orders", "https://receiver.test/hook");
        new.retry_limit = retry_limit;
        SubscriptionRepository::create(&self.storage, new).await.unwrap()
    }

    async fn insert_event(
        &self,
        subscription: &Subscription,
        status: EventStatus,
        attempts: i32,
    ) -> WebhookEvent {
        let mut event = NewEvent::new(
            subscription.id,
            "order.paid",
            json!({"order_id": 7}),
            self.clock.now_utc(),
        )
        .into_event(EventId::new());
        event.status = status;
        event.attempts = attempts;
        self.storage.insert_event(event.clone()).await;
        event
    }
}

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

#[tokio::test]
async fn health_reports_engine_state_and_request_id() {
    let app = TestApp::new();

    let response = app.request(Method::GET, "/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.headers.contains_key("x-request-id"));
    assert_eq!(response.body["status"], "degraded");
    assert_eq!(response.body["engine"]["running"], false);

    app.state.engine.start();
    let response = app.request(Method::GET, "/health", None).await;
    app.state.engine.stop();

    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["engine"]["running"], true);
}

#[tokio::test]
async fn subscription_crud_round_trip() {
    let app = TestApp::new();

    let created = app
        .request(
            Method::POST,
            "/api/subscriptions",
            Some(json!({
                "name": "billing",
                "url": "https://billing.test/hooks",
                "method": "PUT",
                "headers": {"Authorization": "Bearer abc"},
                "retry_limit": 5,
                "retry_interval_secs": 30
            })),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["method"], "PUT");
    assert_eq!(created.body["enabled"], true);
    let id = created.body["id"].as_str().unwrap().to_string();

    let fetched = app.request(Method::GET, &format!("/api/subscriptions/{id}"), None).await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.body["headers"]["Authorization"], "Bearer abc");

    let updated = app
        .request(
            Method::PATCH,
            &format!("/api/subscriptions/{id}"),
            Some(json!({"enabled": false, "retry_interval_secs": null})),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["enabled"], false);
    assert_eq!(updated.body["retry_interval_secs"], Value::Null);
    assert_eq!(updated.body["retry_limit"], 5);

    let listed = app.request(Method::GET, "/api/subscriptions", None).await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);

    let deleted = app.request(Method::DELETE, &format!("/api/subscriptions/{id}"), None).await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    let gone = app.request(Method::GET, &format!("/api/subscriptions/{id}"), None).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    assert_eq!(gone.body["error"]["code"], "not_found");
}

#[tokio::test]
async fn invalid_subscription_is_rejected_with_error_body() {
    let app = TestApp::new();

    let bad_url = app
        .request(
            Method::POST,
            "/api/subscriptions",
            Some(json!({"name": "x", "url": "ftp://nope"})),
        )
        .await;
    assert_eq!(bad_url.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_url.body["error"]["code"], "bad_request");
    assert!(bad_url.body["error"]["message"].is_string());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/subscriptions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let malformed = app.send(request).await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert_eq!(malformed.body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn invalid_update_leaves_subscription_unchanged() {
    let app = TestApp::new();
    let subscription = app.subscription(3).await;

    let response = app
        .request(
            Method::PATCH,
            &format!("/api/subscriptions/{}", subscription.id),
            Some(json!({"retry_limit": 42})),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let stored =
        SubscriptionRepository::find_by_id(&app.storage, subscription.id).await.unwrap().unwrap();
    assert_eq!(stored.retry_limit, 3);
}

#[tokio::test]
async fn unknown_subscription_update_and_delete_are_not_found() {
    let app = TestApp::new();
    let id = uuid::Uuid::new_v4();

    let update = app
        .request(Method::PATCH, &format!("/api/subscriptions/{id}"), Some(json!({"name": "n"})))
        .await;
    let delete = app.request(Method::DELETE, &format!("/api/subscriptions/{id}"), None).await;
    let events = app.request(Method::GET, &format!("/api/subscriptions/{id}/events"), None).await;

    assert_eq!(update.status, StatusCode::NOT_FOUND);
    assert_eq!(delete.status, StatusCode::NOT_FOUND);
    assert_eq!(events.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn created_event_is_delivered_without_waiting_for_a_tick() {
    let app = TestApp::new();
    let subscription = app.subscription(3).await;

    let created = app
        .request(
            Method::POST,
            "/api/events",
            Some(json!({
                "subscription_id": subscription.id,
                "type": "order.paid",
                "payload": {"order_id": 42}
            })),
        )
        .await;

    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["status"], "pending");
    assert_eq!(created.body["attempts"], 0);
    let id: EventId = serde_json::from_value(created.body["id"].clone()).unwrap();

    let mut delivered = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let event = app.storage.event(id).await.unwrap();
        if event.status == EventStatus::Delivered {
            delivered = Some(event);
            break;
        }
    }

    let delivered = delivered.expect("event should be delivered by the immediate scan");
    assert_eq!(delivered.attempts, 1);
    assert_eq!(delivered.status_code, Some(200));
}

#[tokio::test]
async fn event_for_unknown_subscription_is_not_found() {
    let app = TestApp::new();

    let response = app
        .request(
            Method::POST,
            "/api/events",
            Some(json!({
                "subscription_id": uuid::Uuid::new_v4(),
                "type": "order.paid",
                "payload": {}
            })),
        )
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn event_with_invalid_payload_is_rejected() {
    let app = TestApp::new();
    let subscription = app.subscription(3).await;

    let response = app
        .request(
            Method::POST,
            "/api/events",
            Some(json!({"subscription_id": subscription.id, "type": "order.paid", "payload": [1]})),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn event_lists_are_newest_first_and_paginated() {
    let app = TestApp::new();
    let subscription = app.subscription(3).await;
    let other = app.subscription(3).await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(app.insert_event(&subscription, EventStatus::Pending, 0).await.id);
        app.clock.advance(Duration::from_secs(1));
    }
    app.insert_event(&other, EventStatus::Pending, 0).await;

    let page = app.request(Method::GET, "/api/events?limit=2&offset=1", None).await;
    let page_ids: Vec<&str> =
        page.body.as_array().unwrap().iter().map(|e| e["id"].as_str().unwrap()).collect();
    assert_eq!(page_ids, vec![ids[2].to_string(), ids[1].to_string()]);

    let scoped = app
        .request(Method::GET, &format!("/api/subscriptions/{}/events", subscription.id), None)
        .await;
    assert_eq!(scoped.body.as_array().unwrap().len(), 3);

    let one = app.request(Method::GET, &format!("/api/events/{}", ids[0]), None).await;
    assert_eq!(one.status, StatusCode::OK);
    assert_eq!(one.body["event_type"], "order.paid");

    let missing = app.request(Method::GET, &format!("/api/events/{}", EventId::new()), None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_retry_of_failed_event_returns_result() {
    let app = TestApp::new();
    let subscription = app.subscription(2).await;
    let event = app.insert_event(&subscription, EventStatus::Failed, 3).await;

    let response =
        app.request(Method::POST, &format!("/api/events/{}/retry", event.id), None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "delivered");
    assert_eq!(response.body["attempts"], 4);
}

#[tokio::test]
async fn manual_retry_past_limit_with_failing_receiver_fails_again() {
    let app = TestApp::with_receiver_status(503);
    let subscription = app.subscription(2).await;
    let event = app.insert_event(&subscription, EventStatus::Failed, 3).await;

    let response =
        app.request(Method::POST, &format!("/api/events/{}/retry", event.id), None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "failed");
    assert_eq!(response.body["attempts"], 4);
    assert_eq!(response.body["status_code"], 503);
}

#[tokio::test]
async fn manual_retry_attempts_scheduled_event_now() {
    let app = TestApp::new();
    let subscription = app.subscription(3).await;
    let mut event = NewEvent::new(
        subscription.id,
        "order.paid",
        json!({"order_id": 7}),
        app.clock.now_utc(),
    )
    .into_event(EventId::new());
    event.status = EventStatus::Retrying;
    event.attempts = 1;
    event.next_retry_at = Some(app.clock.now_utc() + ChronoDuration::seconds(900));
    app.storage.insert_event(event.clone()).await;

    let response =
        app.request(Method::POST, &format!("/api/events/{}/retry", event.id), None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "delivered");
    assert_eq!(response.body["attempts"], 2);
}

#[tokio::test]
async fn manual_retry_rejects_unknown_and_illegal_events() {
    let app = TestApp::new();
    let subscription = app.subscription(3).await;
    let delivered = app.insert_event(&subscription, EventStatus::Delivered, 1).await;

    let unknown =
        app.request(Method::POST, &format!("/api/events/{}/retry", EventId::new()), None).await;
    let terminal =
        app.request(Method::POST, &format!("/api/events/{}/retry", delivered.id), None).await;

    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    assert_eq!(terminal.status, StatusCode::CONFLICT);
    assert_eq!(terminal.body["error"]["code"], "conflict");
}

#[tokio::test]
async fn malformed_ids_are_rejected_with_error_body() {
    let app = TestApp::new();

    for (method, uri) in [
        (Method::GET, "/api/events/not-a-uuid"),
        (Method::POST, "/api/events/not-a-uuid/retry"),
        (Method::GET, "/api/subscriptions/42"),
        (Method::DELETE, "/api/subscriptions/42"),
        (Method::GET, "/api/subscriptions/42/events"),
    ] {
        let response = app.request(method.clone(), uri, None).await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{method} {uri}");
        assert_eq!(response.body["error"]["code"], "bad_request", "{method} {uri}");
        assert!(response.body["error"]["message"].is_string(), "{method} {uri}");
    }
}

#[tokio::test]
async fn stats_summarize_last_day() {
    let app = TestApp::new();
    let subscription = app.subscription(3).await;

    // Outside the 24h window.
    app.insert_event(&subscription, EventStatus::Failed, 4).await;
    app.clock.advance(Duration::from_secs(2 * 86_400));

    app.insert_event(&subscription, EventStatus::Delivered, 1).await;
    app.insert_event(&subscription, EventStatus::Delivered, 1).await;
    app.insert_event(&subscription, EventStatus::Failed, 4).await;
    app.insert_event(&subscription, EventStatus::Pending, 0).await;

    let response = app.request(Method::GET, "/api/stats", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total_subscriptions"], 1);
    assert_eq!(response.body["delivered_last_24h"], 2);
    assert_eq!(response.body["failed_last_24h"], 1);
    assert_eq!(response.body["success_rate"], 66.7);

    let rates = response.body["subscription_success_rates"].as_array().unwrap();
    assert_eq!(rates.len(), 1);
    assert_eq!(rates[0]["total"], 5);
    assert_eq!(rates[0]["delivered"], 2);
    assert_eq!(rates[0]["rate"], 40);
}

#[tokio::test]
async fn delivery_stats_are_zero_filled_per_day() {
    let app = TestApp::new();
    let subscription = app.subscription(3).await;
    app.insert_event(&subscription, EventStatus::Delivered, 1).await;
    app.insert_event(&subscription, EventStatus::Failed, 4).await;
    let today = app.clock.now_utc().date_naive();

    let response = app.request(Method::GET, "/api/stats/delivery?days=3", None).await;

    assert_eq!(response.status, StatusCode::OK);
    let days = response.body.as_array().unwrap();
    assert_eq!(days.len(), 3);
    assert_eq!(days[2]["date"], today.to_string());
    assert_eq!(days[2]["delivered"], 1);
    assert_eq!(days[2]["failed"], 1);
    assert_eq!(days[0]["date"], (today - ChronoDuration::days(2)).to_string());
    assert_eq!(days[0]["delivered"], 0);

    let default = app.request(Method::GET, "/api/stats/delivery", None).await;
    assert_eq!(default.body.as_array().unwrap().len(), 7);

    for bad in ["0", "91", "seven"] {
        let response =
            app.request(Method::GET, &format!("/api/stats/delivery?days={bad}"), None).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "days={bad}");
    }
}
