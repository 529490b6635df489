//! In-memory repository implementation.
//!
//! Holds subscriptions and events in process memory with the same semantics
//! as the PostgreSQL repositories. Used by tests across the workspace, and
//! supports injecting failures and latency to exercise error paths in the
//! delivery engine.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{EventRepository, SubscriptionRepository};
use crate::{
    error::{CoreError, Result},
    models::{
        DailyOutcome, EventId, EventStatus, EventUpdate, NewEvent, NewSubscription, Page,
        StatusCounts, Subscription, SubscriptionId, SubscriptionOutcome, SubscriptionUpdate,
        WebhookEvent,
    },
};

/// In-memory storage implementing both repository traits.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
    events: Arc<RwLock<HashMap<EventId, WebhookEvent>>>,
    due_error: Arc<RwLock<Option<String>>>,
    failing_updates: Arc<RwLock<HashSet<EventId>>>,
    find_due_delay: Arc<RwLock<Option<Duration>>>,
    find_due_calls: Arc<AtomicUsize>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `find_due` call fail with a database error.
    pub async fn inject_due_error(&self, message: impl Into<String>) {
        *self.due_error.write().await = Some(message.into());
    }

    /// Makes every update of `event_id` fail with a database error.
    pub async fn fail_updates_for(&self, event_id: EventId) {
        self.failing_updates.write().await.insert(event_id);
    }

    /// Delays every `find_due` call by `delay`.
    pub async fn set_find_due_delay(&self, delay: Duration) {
        *self.find_due_delay.write().await = Some(delay);
    }

    /// Number of `find_due` calls made so far.
    pub fn find_due_calls(&self) -> usize {
        self.find_due_calls.load(Ordering::SeqCst)
    }

    /// Stores an event as-is, bypassing creation defaults.
    pub async fn insert_event(&self, event: WebhookEvent) {
        self.events.write().await.insert(event.id, event);
    }

    /// Returns a stored event.
    pub async fn event(&self, id: EventId) -> Option<WebhookEvent> {
        self.events.read().await.get(&id).cloned()
    }

    async fn find_due_impl(&self, now: DateTime<Utc>) -> Result<Vec<WebhookEvent>> {
        self.find_due_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.find_due_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.due_error.write().await.take() {
            return Err(CoreError::Database(message));
        }

        let mut due: Vec<WebhookEvent> =
            self.events.read().await.values().filter(|e| e.is_due(now)).cloned().collect();
        due.sort_by_key(|e| (e.created_at, e.id));

        Ok(due)
    }

    async fn create_subscription_impl(&self, new: NewSubscription) -> Result<Subscription> {
        let subscription = new.into_subscription(SubscriptionId::new(), Utc::now());
        subscription.validate()?;
        self.subscriptions.write().await.insert(subscription.id, subscription.clone());

        Ok(subscription)
    }

    async fn update_subscription_impl(
        &self,
        id: SubscriptionId,
        changes: SubscriptionUpdate,
    ) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let stored = subscriptions
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("subscription {id}")))?;

        let mut updated = stored.clone();
        changes.apply_to(&mut updated);
        updated.validate()?;
        *stored = updated.clone();

        Ok(updated)
    }

    async fn delete_subscription_impl(&self, id: SubscriptionId) -> Result<bool> {
        let existed = self.subscriptions.write().await.remove(&id).is_some();
        if existed {
            self.events.write().await.retain(|_, e| e.subscription_id != id);
        }

        Ok(existed)
    }

    async fn create_event_impl(&self, new: NewEvent) -> Result<WebhookEvent> {
        new.validate()?;
        if !self.subscriptions.read().await.contains_key(&new.subscription_id) {
            return Err(CoreError::ConstraintViolation(format!(
                "subscription {} does not exist",
                new.subscription_id
            )));
        }

        let event = new.into_event(EventId::new());
        self.events.write().await.insert(event.id, event.clone());

        Ok(event)
    }

    async fn update_event_impl(&self, id: EventId, changes: EventUpdate) -> Result<WebhookEvent> {
        if self.failing_updates.read().await.contains(&id) {
            return Err(CoreError::Database(format!("injected update failure for event {id}")));
        }

        let mut events = self.events.write().await;
        let event = events.get_mut(&id).ok_or_else(|| CoreError::NotFound(format!("event {id}")))?;
        changes.apply_to(event);

        Ok(event.clone())
    }

    async fn list_events_impl(
        &self,
        subscription_id: Option<SubscriptionId>,
        page: Page,
    ) -> Result<Vec<WebhookEvent>> {
        let mut events: Vec<WebhookEvent> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| subscription_id.map_or(true, |id| e.subscription_id == id))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        Ok(events.into_iter().skip(page.offset as usize).take(page.limit as usize).collect())
    }

    async fn status_counts_impl(&self, since: DateTime<Utc>) -> Result<StatusCounts> {
        let events = self.events.read().await;
        let mut counts = StatusCounts::default();
        for event in events.values().filter(|e| e.created_at >= since) {
            counts.total += 1;
            match event.status {
                EventStatus::Pending => counts.pending += 1,
                EventStatus::Retrying => counts.retrying += 1,
                EventStatus::Delivered => counts.delivered += 1,
                EventStatus::Failed => counts.failed += 1,
            }
        }

        Ok(counts)
    }

    async fn daily_outcomes_impl(&self, since: DateTime<Utc>) -> Result<Vec<DailyOutcome>> {
        let events = self.events.read().await;
        let mut days = BTreeMap::new();
        for event in events.values().filter(|e| e.created_at >= since) {
            let date = event.created_at.date_naive();
            let day =
                days.entry(date).or_insert(DailyOutcome { date, delivered: 0, failed: 0 });
            match event.status {
                EventStatus::Delivered => day.delivered += 1,
                EventStatus::Failed => day.failed += 1,
                EventStatus::Pending | EventStatus::Retrying => {},
            }
        }

        Ok(days.into_values().collect())
    }

    async fn subscription_outcomes_impl(&self) -> Result<Vec<SubscriptionOutcome>> {
        let subscriptions = self.subscriptions.read().await;
        let events = self.events.read().await;

        let mut ordered: Vec<&Subscription> = subscriptions.values().collect();
        ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(ordered
            .into_iter()
            .map(|sub| {
                let (total, delivered) = events
                    .values()
                    .filter(|e| e.subscription_id == sub.id)
                    .fold((0, 0), |(total, delivered), e| {
                        (total + 1, delivered + i64::from(e.status == EventStatus::Delivered))
                    });
                SubscriptionOutcome {
                    subscription_id: sub.id,
                    subscription_name: sub.name.clone(),
                    total,
                    delivered,
                }
            })
            .collect())
    }
}

impl SubscriptionRepository for MemoryStorage {
    fn find_by_id(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Subscription>>> + Send + '_>> {
        Box::pin(async move { Ok(self.subscriptions.read().await.get(&id).cloned()) })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>> {
        Box::pin(async move {
            let mut subscriptions: Vec<Subscription> =
                self.subscriptions.read().await.values().cloned().collect();
            subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(subscriptions)
        })
    }

    fn create(
        &self,
        subscription: NewSubscription,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription>> + Send + '_>> {
        Box::pin(self.create_subscription_impl(subscription))
    }

    fn update(
        &self,
        id: SubscriptionId,
        changes: SubscriptionUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription>> + Send + '_>> {
        Box::pin(self.update_subscription_impl(id, changes))
    }

    fn delete(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(self.delete_subscription_impl(id))
    }
}

impl EventRepository for MemoryStorage {
    fn find_due(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<WebhookEvent>>> + Send + '_>> {
        Box::pin(self.find_due_impl(now))
    }

    fn find_by_id(
        &self,
        id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookEvent>>> + Send + '_>> {
        Box::pin(async move { Ok(self.events.read().await.get(&id).cloned()) })
    }

    fn create(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<WebhookEvent>> + Send + '_>> {
        Box::pin(self.create_event_impl(event))
    }

    fn update(
        &self,
        id: EventId,
        changes: EventUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<WebhookEvent>> + Send + '_>> {
        Box::pin(self.update_event_impl(id, changes))
    }

    fn list(
        &self,
        page: Page,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<WebhookEvent>>> + Send + '_>> {
        Box::pin(self.list_events_impl(None, page))
    }

    fn list_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        page: Page,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<WebhookEvent>>> + Send + '_>> {
        Box::pin(self.list_events_impl(Some(subscription_id), page))
    }

    fn status_counts(
        &self,
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<StatusCounts>> + Send + '_>> {
        Box::pin(self.status_counts_impl(since))
    }

    fn daily_outcomes(
        &self,
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DailyOutcome>>> + Send + '_>> {
        Box::pin(self.daily_outcomes_impl(since))
    }

    fn subscription_outcomes(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SubscriptionOutcome>>> + Send + '_>> {
        Box::pin(self.subscription_outcomes_impl())
    }
}
