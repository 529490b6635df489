//! Persistence layer implementing the repository pattern.
//!
//! The delivery engine and the HTTP handlers only ever talk to the
//! [`SubscriptionRepository`] and [`EventRepository`] traits. Production wires
//! in the PostgreSQL repositories held by [`Storage`]; tests use
//! [`memory::MemoryStorage`].

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub mod memory;
pub mod subscriptions;
pub mod webhook_events;

use crate::{
    error::Result,
    models::{
        DailyOutcome, EventId, EventUpdate, NewEvent, NewSubscription, Page, StatusCounts,
        Subscription, SubscriptionId, SubscriptionOutcome, SubscriptionUpdate, WebhookEvent,
    },
};

/// Storage operations on subscriptions.
pub trait SubscriptionRepository: Send + Sync + 'static {
    /// Finds a subscription by ID.
    fn find_by_id(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Subscription>>> + Send + '_>>;

    /// Lists all subscriptions, newest first.
    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>>;

    /// Validates and stores a new subscription.
    fn create(
        &self,
        subscription: NewSubscription,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription>> + Send + '_>>;

    /// Applies a partial update and returns the stored result.
    ///
    /// Fails with `CoreError::NotFound` for an unknown ID and with
    /// `CoreError::InvalidInput` when the merged subscription is invalid.
    fn update(
        &self,
        id: SubscriptionId,
        changes: SubscriptionUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription>> + Send + '_>>;

    /// Deletes a subscription and its events. Returns whether it existed.
    fn delete(&self, id: SubscriptionId)
        -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;
}

/// Storage operations on webhook events.
pub trait EventRepository: Send + Sync + 'static {
    /// Returns events due for an automatic attempt at `now`, oldest first.
    ///
    /// An event is due when it is `Pending`, or `Retrying` with a
    /// `next_retry_at` at or before `now`. Terminal events are never due.
    fn find_due(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<WebhookEvent>>> + Send + '_>>;

    /// Finds an event by ID.
    fn find_by_id(
        &self,
        id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookEvent>>> + Send + '_>>;

    /// Validates and stores a new pending event.
    ///
    /// Fails with `CoreError::ConstraintViolation` when the subscription does
    /// not exist.
    fn create(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<WebhookEvent>> + Send + '_>>;

    /// Applies a partial update and returns the stored result.
    ///
    /// Fails with `CoreError::NotFound` for an unknown ID.
    fn update(
        &self,
        id: EventId,
        changes: EventUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<WebhookEvent>> + Send + '_>>;

    /// Lists events, newest first.
    fn list(&self, page: Page)
        -> Pin<Box<dyn Future<Output = Result<Vec<WebhookEvent>>> + Send + '_>>;

    /// Lists events of one subscription, newest first.
    fn list_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        page: Page,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<WebhookEvent>>> + Send + '_>>;

    /// Counts events created at or after `since`, by status.
    fn status_counts(
        &self,
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<StatusCounts>> + Send + '_>>;

    /// Delivered and failed counts per creation day, for days with events
    /// created at or after `since`, oldest day first.
    fn daily_outcomes(
        &self,
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DailyOutcome>>> + Send + '_>>;

    /// Per-subscription totals over all events.
    fn subscription_outcomes(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SubscriptionOutcome>>> + Send + '_>>;
}

/// Container for the PostgreSQL repositories sharing one pool.
#[derive(Clone)]
pub struct Storage {
    /// Repository for subscriptions.
    pub subscriptions: Arc<subscriptions::Repository>,

    /// Repository for webhook events.
    pub webhook_events: Arc<webhook_events::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            subscriptions: Arc::new(subscriptions::Repository::new(pool.clone())),
            webhook_events: Arc::new(webhook_events::Repository::new(pool)),
        }
    }

    /// Returns the shared connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.webhook_events.pool()
    }

    /// Creates the schema if it does not exist yet.
    ///
    /// Every statement is idempotent, so this runs on each startup.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        let pool = self.pool();

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                url TEXT NOT NULL,
                method TEXT NOT NULL DEFAULT 'POST',
                headers JSONB NOT NULL DEFAULT '{}'::jsonb,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                retry_limit INTEGER NOT NULL DEFAULT 3
                    CHECK (retry_limit BETWEEN 0 AND 10),
                retry_interval_secs INTEGER
                    CHECK (retry_interval_secs IS NULL OR retry_interval_secs BETWEEN 5 AND 3600),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&*pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_events (
                id UUID PRIMARY KEY,
                subscription_id UUID NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
                event_type TEXT NOT NULL,
                payload JSONB NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                status_code INTEGER,
                response_body TEXT,
                error_message TEXT,
                duration_ms BIGINT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_attempt_at TIMESTAMPTZ,
                next_retry_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&*pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_webhook_events_due
            ON webhook_events(status, next_retry_at, created_at)
            WHERE status IN ('pending', 'retrying')
            "#,
        )
        .execute(&*pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_webhook_events_subscription
            ON webhook_events(subscription_id, created_at DESC)
            "#,
        )
        .execute(&*pool)
        .await?;

        tracing::debug!("Database schema is up to date");

        Ok(())
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool()).await?;

        Ok(())
    }
}
