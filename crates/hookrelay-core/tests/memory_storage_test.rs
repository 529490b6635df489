//! Behavior of the in-memory repositories.

use chrono::{Duration, Utc};
use hookrelay_core::{
    models::{
        EventStatus, EventUpdate, NewEvent, NewSubscription, Page, SubscriptionUpdate,
    },
    storage::{memory::MemoryStorage, EventRepository, SubscriptionRepository},
    CoreError,
};

async fn storage_with_subscription() -> (MemoryStorage, hookrelay_core::Subscription) {
    let storage = MemoryStorage::new();
    let subscription = SubscriptionRepository::create(
        &storage,
        NewSubscription::new("orders", "https://receiver.test/hook"),
    )
    .await
    .unwrap();
    (storage, subscription)
}

#[tokio::test]
async fn find_due_returns_pending_and_expired_retries_oldest_first() {
    let (storage, sub) = storage_with_subscription().await;
    let now = Utc::now();

    let newer = EventRepository::create(
        &storage,
        NewEvent::new(sub.id, "order.created", serde_json::json!({"n": 2}), now),
    )
    .await
    .unwrap();
    let older = EventRepository::create(
        &storage,
        NewEvent::new(sub.id, "order.created", serde_json::json!({"n": 1}), now - Duration::minutes(5)),
    )
    .await
    .unwrap();
    let waiting = EventRepository::create(
        &storage,
        NewEvent::new(sub.id, "order.created", serde_json::json!({"n": 3}), now - Duration::minutes(10)),
    )
    .await
    .unwrap();
    let schedule = EventUpdate {
        status: Some(EventStatus::Retrying),
        next_retry_at: Some(Some(now + Duration::minutes(1))),
        ..Default::default()
    };
    EventRepository::update(&storage, waiting.id, schedule).await.unwrap();

    let due = storage.find_due(now).await.unwrap();
    let ids: Vec<_> = due.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![older.id, newer.id]);

    let later = storage.find_due(now + Duration::minutes(2)).await.unwrap();
    assert_eq!(later.first().map(|e| e.id), Some(waiting.id));
}

#[tokio::test]
async fn delivered_events_are_never_due() {
    let (storage, sub) = storage_with_subscription().await;
    let event = EventRepository::create(
        &storage,
        NewEvent::new(sub.id, "order.paid", serde_json::json!({}), Utc::now()),
    )
    .await
    .unwrap();
    let delivered = EventUpdate {
        status: Some(EventStatus::Delivered),
        next_retry_at: Some(Some(Utc::now() - Duration::hours(1))),
        ..Default::default()
    };
    EventRepository::update(&storage, event.id, delivered).await.unwrap();

    assert!(storage.find_due(Utc::now() + Duration::days(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn event_for_unknown_subscription_is_rejected() {
    let storage = MemoryStorage::new();

    let result = EventRepository::create(
        &storage,
        NewEvent::new(hookrelay_core::SubscriptionId::new(), "a.b", serde_json::json!({}), Utc::now()),
    )
    .await;

    assert!(matches!(result, Err(CoreError::ConstraintViolation(_))));
}

#[tokio::test]
async fn invalid_subscription_update_leaves_stored_copy_untouched() {
    let (storage, sub) = storage_with_subscription().await;

    let result = SubscriptionRepository::update(&storage, sub.id, SubscriptionUpdate {
        retry_limit: Some(42),
        ..Default::default()
    })
    .await;

    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    let stored = SubscriptionRepository::find_by_id(&storage, sub.id).await.unwrap().unwrap();
    assert_eq!(stored.retry_limit, sub.retry_limit);
}

#[tokio::test]
async fn deleting_subscription_removes_its_events() {
    let (storage, sub) = storage_with_subscription().await;
    let event = EventRepository::create(
        &storage,
        NewEvent::new(sub.id, "a.b", serde_json::json!({}), Utc::now()),
    )
    .await
    .unwrap();

    assert!(SubscriptionRepository::delete(&storage, sub.id).await.unwrap());
    assert!(EventRepository::find_by_id(&storage, event.id).await.unwrap().is_none());
    assert!(!SubscriptionRepository::delete(&storage, sub.id).await.unwrap());
}

#[tokio::test]
async fn listing_is_newest_first_and_paginated() {
    let (storage, sub) = storage_with_subscription().await;
    let base = Utc::now();
    for minutes in 0..5 {
        EventRepository::create(
            &storage,
            NewEvent::new(sub.id, "a.b", serde_json::json!({ "m": minutes }), base + Duration::minutes(minutes)),
        )
        .await
        .unwrap();
    }

    let page = EventRepository::list(&storage, Page::new(2, 1)).await.unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page[0].payload()["m"], 3);
    assert_eq!(page[1].payload()["m"], 2);
}

#[tokio::test]
async fn stats_count_statuses_and_group_outcomes() {
    let (storage, sub) = storage_with_subscription().await;
    let now = Utc::now();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let event = EventRepository::create(
            &storage,
            NewEvent::new(sub.id, "a.b", serde_json::json!({}), now),
        )
        .await
        .unwrap();
        ids.push(event.id);
    }
    let delivered = EventUpdate { status: Some(EventStatus::Delivered), ..Default::default() };
    EventRepository::update(&storage, ids[0], delivered).await.unwrap();
    let failed = EventUpdate { status: Some(EventStatus::Failed), ..Default::default() };
    EventRepository::update(&storage, ids[1], failed).await.unwrap();

    let counts = storage.status_counts(now - Duration::hours(1)).await.unwrap();
    assert_eq!((counts.total, counts.pending, counts.delivered, counts.failed), (3, 1, 1, 1));

    let days = storage.daily_outcomes(now - Duration::hours(1)).await.unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!((days[0].delivered, days[0].failed), (1, 1));

    let outcomes = storage.subscription_outcomes().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!((outcomes[0].total, outcomes[0].delivered), (3, 1));
    assert_eq!(outcomes[0].success_rate(), 33);
}

#[tokio::test]
async fn injected_update_failure_is_scoped_to_one_event() {
    let (storage, sub) = storage_with_subscription().await;
    let broken = EventRepository::create(
        &storage,
        NewEvent::new(sub.id, "a.b", serde_json::json!({}), Utc::now()),
    )
    .await
    .unwrap();
    let healthy = EventRepository::create(
        &storage,
        NewEvent::new(sub.id, "a.b", serde_json::json!({}), Utc::now()),
    )
    .await
    .unwrap();
    storage.fail_updates_for(broken.id).await;

    let update = EventUpdate { attempts: Some(1), ..Default::default() };
    assert!(matches!(
        EventRepository::update(&storage, broken.id, update.clone()).await,
        Err(CoreError::Database(_))
    ));
    assert_eq!(EventRepository::update(&storage, healthy.id, update).await.unwrap().attempts, 1);
}
