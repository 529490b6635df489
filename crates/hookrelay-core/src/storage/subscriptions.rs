//! Repository for subscription database operations.
//!
//! Subscriptions define where and how events are delivered: destination URL,
//! method, extra headers and retry policy.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::Utc;
use sqlx::{Executor, PgPool, Postgres, Transaction};

use super::SubscriptionRepository;
use crate::{
    error::{CoreError, Result},
    models::{NewSubscription, Subscription, SubscriptionId, SubscriptionUpdate},
};

const SUBSCRIPTION_COLUMNS: &str = "id, name, description, url, method, headers, enabled, \
                                    retry_limit, retry_interval_secs, created_at";

/// Repository for subscription database operations.
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

    /// Creates a new subscription.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if validation fails, or a database
    /// error if the insert fails.
    pub async fn create(&self, new: NewSubscription) -> Result<Subscription> {
        let subscription = new.into_subscription(SubscriptionId::new(), Utc::now());
        subscription.validate()?;
        self.insert_impl(&*self.pool, &subscription).await
    }

    async fn insert_impl<'e, E>(&self, executor: E, subscription: &Subscription) -> Result<Subscription>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let stored = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (
                id, name, description, url, method, headers, enabled,
                retry_limit, retry_interval_secs, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.description)
        .bind(&subscription.url)
        .bind(subscription.method)
        .bind(&subscription.headers)
        .bind(subscription.enabled)
        .bind(subscription.retry_limit)
        .bind(subscription.retry_interval_secs)
        .bind(subscription.created_at)
        .fetch_one(executor)
        .await?;

        Ok(stored)
    }

    /// Finds a subscription by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        self.find_by_id_impl(&*self.pool, id, false).await
    }

    async fn find_by_id_impl<'e, E>(
        &self,
        executor: E,
        id: SubscriptionId,
        for_update: bool,
    ) -> Result<Option<Subscription>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let lock = if for_update { "FOR UPDATE" } else { "" };
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1 {lock}"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(subscription)
    }

    /// Lists all subscriptions, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn list(&self) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY created_at DESC"
        ))
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Applies a partial update.
    ///
    /// The row is locked, merged with `changes` and validated before being
    /// written back, all inside one transaction.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown ID and
    /// `CoreError::InvalidInput` if the merged subscription is invalid.
    pub async fn update(
        &self,
        id: SubscriptionId,
        changes: &SubscriptionUpdate,
    ) -> Result<Subscription> {
        let mut tx = self.pool.begin().await?;

        let mut subscription = self
            .find_by_id_impl(&mut *tx, id, true)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("subscription {id}")))?;
        changes.apply_to(&mut subscription);
        subscription.validate()?;

        let stored = self.write_impl(&mut tx, &subscription).await?;
        tx.commit().await?;

        Ok(stored)
    }

    async fn write_impl(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        subscription: &Subscription,
    ) -> Result<Subscription> {
        let stored = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET name = $2, description = $3, url = $4, method = $5, headers = $6,
                enabled = $7, retry_limit = $8, retry_interval_secs = $9
            WHERE id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.description)
        .bind(&subscription.url)
        .bind(subscription.method)
        .bind(&subscription.headers)
        .bind(subscription.enabled)
        .bind(subscription.retry_limit)
        .bind(subscription.retry_interval_secs)
        .fetch_one(&mut **tx)
        .await?;

        Ok(stored)
    }

    /// Deletes a subscription. Its events are removed by the cascade.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(&self, id: SubscriptionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;

        tracing::debug!(
            subscription_id = %id,
            rows_affected = result.rows_affected(),
            "Subscription delete completed"
        );

        Ok(result.rows_affected() > 0)
    }
}

impl SubscriptionRepository for Repository {
    fn find_by_id(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Subscription>>> + Send + '_>> {
        Box::pin(Repository::find_by_id(self, id))
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>> {
        Box::pin(Repository::list(self))
    }

    fn create(
        &self,
        subscription: NewSubscription,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription>> + Send + '_>> {
        Box::pin(Repository::create(self, subscription))
    }

    fn update(
        &self,
        id: SubscriptionId,
        changes: SubscriptionUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription>> + Send + '_>> {
        Box::pin(async move { Repository::update(self, id, &changes).await })
    }

    fn delete(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(Repository::delete(self, id))
    }
}
