//! Repository for webhook event database operations.
//!
//! Provides due-event scans for the delivery engine, partial updates of the
//! delivery state, paginated listings and the aggregates behind the stats
//! endpoints.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};

use super::EventRepository;
use crate::{
    error::{CoreError, Result},
    models::{
        DailyOutcome, EventId, EventUpdate, NewEvent, Page, StatusCounts, SubscriptionId,
        SubscriptionOutcome, WebhookEvent,
    },
};

const EVENT_COLUMNS: &str = "id, subscription_id, event_type, payload, status, attempts, \
                             status_code, response_body, error_message, duration_ms, \
                             created_at, last_attempt_at, next_retry_at";

/// Repository for webhook event database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Finds events due for an automatic attempt, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM webhook_events
            WHERE status = 'pending'
               OR (status = 'retrying' AND next_retry_at IS NOT NULL AND next_retry_at <= $1)
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(now)
        .fetch_all(&*self.pool)
        .await?;

        tracing::debug!(due = events.len(), "Due event query completed");

        Ok(events)
    }

    /// Creates a new pending event.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for a malformed event and
    /// `CoreError::ConstraintViolation` when the subscription does not exist.
    pub async fn create(&self, new: NewEvent) -> Result<WebhookEvent> {
        new.validate()?;
        self.create_impl(&*self.pool, new.into_event(EventId::new())).await
    }

    async fn create_impl<'e, E>(&self, executor: E, event: WebhookEvent) -> Result<WebhookEvent>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let stored = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            INSERT INTO webhook_events (
                id, subscription_id, event_type, payload, status, attempts, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event.id)
        .bind(event.subscription_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status)
        .bind(event.attempts)
        .bind(event.created_at)
        .fetch_one(executor)
        .await?;

        Ok(stored)
    }

    /// Finds an event by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, id: EventId) -> Result<Option<WebhookEvent>> {
        let event = sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Applies a partial update in a single statement.
    ///
    /// Only the fields present in `changes` appear in the `SET` clause.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if no event has this ID.
    pub async fn update(&self, id: EventId, changes: EventUpdate) -> Result<WebhookEvent> {
        if changes.is_empty() {
            return self
                .find_by_id(id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("event {id}")));
        }

        let mut query = QueryBuilder::<Postgres>::new("UPDATE webhook_events SET ");
        let mut set = query.separated(", ");
        if let Some(status) = changes.status {
            set.push("status = ").push_bind_unseparated(status);
        }
        if let Some(attempts) = changes.attempts {
            set.push("attempts = ").push_bind_unseparated(attempts);
        }
        if let Some(status_code) = changes.status_code {
            set.push("status_code = ").push_bind_unseparated(status_code);
        }
        if let Some(response_body) = changes.response_body {
            set.push("response_body = ").push_bind_unseparated(response_body);
        }
        if let Some(error_message) = changes.error_message {
            set.push("error_message = ").push_bind_unseparated(error_message);
        }
        if let Some(duration_ms) = changes.duration_ms {
            set.push("duration_ms = ").push_bind_unseparated(duration_ms);
        }
        if let Some(last_attempt_at) = changes.last_attempt_at {
            set.push("last_attempt_at = ").push_bind_unseparated(last_attempt_at);
        }
        if let Some(next_retry_at) = changes.next_retry_at {
            set.push("next_retry_at = ").push_bind_unseparated(next_retry_at);
        }
        query.push(" WHERE id = ").push_bind(id);
        query.push(" RETURNING ").push(EVENT_COLUMNS);

        let updated = query.build_query_as::<WebhookEvent>().fetch_optional(&*self.pool).await?;

        match updated {
            Some(event) => {
                tracing::debug!(
                    event_id = %id,
                    status = %event.status,
                    attempts = event.attempts,
                    "Event updated"
                );
                Ok(event)
            },
            None => {
                tracing::warn!(event_id = %id, "No rows updated - event may have been deleted");
                Err(CoreError::NotFound(format!("event {id}")))
            },
        }
    }

    /// Lists events, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn list(&self, page: Page) -> Result<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM webhook_events
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&*self.pool)
        .await?;

        Ok(events)
    }

    /// Lists events of one subscription, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn list_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        page: Page,
    ) -> Result<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM webhook_events
            WHERE subscription_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(subscription_id)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&*self.pool)
        .await?;

        Ok(events)
    }

    /// Counts events created since `since`, by status.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn status_counts(&self, since: DateTime<Utc>) -> Result<StatusCounts> {
        let (total, pending, retrying, delivered, failed): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*),
                       COUNT(*) FILTER (WHERE status = 'pending'),
                       COUNT(*) FILTER (WHERE status = 'retrying'),
                       COUNT(*) FILTER (WHERE status = 'delivered'),
                       COUNT(*) FILTER (WHERE status = 'failed')
                FROM webhook_events
                WHERE created_at >= $1
                "#,
            )
            .bind(since)
            .fetch_one(&*self.pool)
            .await?;

        Ok(StatusCounts { total, pending, retrying, delivered, failed })
    }

    /// Delivered and failed counts per UTC creation day.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn daily_outcomes(&self, since: DateTime<Utc>) -> Result<Vec<DailyOutcome>> {
        let outcomes = sqlx::query_as::<_, DailyOutcome>(
            r#"
            SELECT (created_at AT TIME ZONE 'UTC')::date AS date,
                   COUNT(*) FILTER (WHERE status = 'delivered') AS delivered,
                   COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM webhook_events
            WHERE created_at >= $1
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(since)
        .fetch_all(&*self.pool)
        .await?;

        Ok(outcomes)
    }

    /// Per-subscription event totals, including subscriptions without events.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn subscription_outcomes(&self) -> Result<Vec<SubscriptionOutcome>> {
        let outcomes = sqlx::query_as::<_, SubscriptionOutcome>(
            r#"
            SELECT s.id AS subscription_id,
                   s.name AS subscription_name,
                   COUNT(e.id) AS total,
                   COUNT(e.id) FILTER (WHERE e.status = 'delivered') AS delivered
            FROM subscriptions s
            LEFT JOIN webhook_events e ON e.subscription_id = s.id
            GROUP BY s.id, s.name, s.created_at
            ORDER BY s.created_at DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(outcomes)
    }
}

impl EventRepository for Repository {
    fn find_due(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<WebhookEvent>>> + Send + '_>> {
        Box::pin(Repository::find_due(self, now))
    }

    fn find_by_id(
        &self,
        id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookEvent>>> + Send + '_>> {
        Box::pin(Repository::find_by_id(self, id))
    }

    fn create(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<WebhookEvent>> + Send + '_>> {
        Box::pin(Repository::create(self, event))
    }

    fn update(
        &self,
        id: EventId,
        changes: EventUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<WebhookEvent>> + Send + '_>> {
        Box::pin(Repository::update(self, id, changes))
    }

    fn list(
        &self,
        page: Page,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<WebhookEvent>>> + Send + '_>> {
        Box::pin(Repository::list(self, page))
    }

    fn list_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        page: Page,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<WebhookEvent>>> + Send + '_>> {
        Box::pin(Repository::list_by_subscription(self, subscription_id, page))
    }

    fn status_counts(
        &self,
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<StatusCounts>> + Send + '_>> {
        Box::pin(Repository::status_counts(self, since))
    }

    fn daily_outcomes(
        &self,
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DailyOutcome>>> + Send + '_>> {
        Box::pin(Repository::daily_outcomes(self, since))
    }

    fn subscription_outcomes(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SubscriptionOutcome>>> + Send + '_>> {
        Box::pin(Repository::subscription_outcomes(self))
    }
}
