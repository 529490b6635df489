//! Single-flight delivery engine.
//!
//! The engine periodically scans for due events and drives each one through
//! exactly one delivery attempt per scan. At most one scan runs at a time:
//! a scan requested while another is in progress returns immediately.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   ┌─────────────────┐   ┌───────────────┐
//! │ DeliveryEngine │──▶│ EventRepository │   │ WebhookSender │
//! └────────────────┘   └─────────────────┘   └───────────────┘
//!        │   │                                      ▲
//!        │   └──────────── one attempt per event ───┘
//!        ▼
//! ┌────────────────────────┐
//! │ SubscriptionRepository │
//! └────────────────────────┘
//! ```
//!
//! Each attempt is recorded before the network call: the event moves to
//! `Retrying` with its attempt counter incremented and `next_retry_at`
//! pushed out by an in-flight lease. A crash mid-delivery therefore loses at
//! most the outcome of that one attempt, and the event becomes due again once
//! the lease expires.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use hookrelay_core::{
    models::{EventStatus, EventUpdate},
    storage::{EventRepository, SubscriptionRepository},
    Clock, EventId, Subscription, WebhookEvent,
};
use tokio::{sync::RwLock, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryOutcome, WebhookSender},
    error::{DeliveryError, Result},
    retry::{default_backoff_table, RetryDecision, RetryPolicy},
    DEFAULT_IN_FLIGHT_LEASE_SECS, DEFAULT_POLL_INTERVAL_SECS,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Time between automatic scans.
    pub poll_interval: Duration,

    /// How long an in-flight attempt hides its event from other scans.
    pub in_flight_lease: Duration,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Escalating retry delays for subscriptions without a fixed interval.
    pub backoff_table: Vec<Duration>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            in_flight_lease: Duration::from_secs(DEFAULT_IN_FLIGHT_LEASE_SECS),
            client_config: ClientConfig::default(),
            backoff_table: default_backoff_table(),
        }
    }
}

/// Cumulative statistics for engine monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Scans that ran to completion.
    pub scans_completed: u64,
    /// Scans skipped because another was in progress.
    pub scans_skipped: u64,
    /// Events that went through an attempt or a pickup failure.
    pub events_processed: u64,
    /// Successful deliveries.
    pub successful_deliveries: u64,
    /// Failed attempts with a retry scheduled.
    pub retries_scheduled: u64,
    /// Events that ended in `Failed`.
    pub permanent_failures: u64,
    /// Events skipped because of a repository or state error.
    pub errors: u64,
    /// Manual triggers that completed.
    pub manual_triggers: u64,
}

/// Result of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// The scan did nothing because another was in progress.
    pub skipped: bool,
    /// Events handled without error.
    pub processed: usize,
    /// Events now `Delivered`.
    pub delivered: usize,
    /// Events now waiting for a retry.
    pub retrying: usize,
    /// Events now `Failed`.
    pub failed: usize,
    /// Events left untouched because of an error.
    pub errors: usize,
}

impl ScanSummary {
    fn skipped() -> Self {
        Self { skipped: true, ..Self::default() }
    }

    fn record(&mut self, status: EventStatus) {
        self.processed += 1;
        match status {
            EventStatus::Delivered => self.delivered += 1,
            EventStatus::Retrying => self.retrying += 1,
            EventStatus::Failed => self.failed += 1,
            EventStatus::Pending => {},
        }
    }
}

impl EngineStats {
    fn absorb(&mut self, summary: &ScanSummary) {
        self.events_processed += summary.processed as u64;
        self.successful_deliveries += summary.delivered as u64;
        self.retries_scheduled += summary.retrying as u64;
        self.permanent_failures += summary.failed as u64;
        self.errors += summary.errors as u64;
    }
}

/// Resets the in-progress flag when a scan ends, including on panic.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Delivery engine driving events from `Pending` to a terminal state.
pub struct DeliveryEngine {
    subscriptions: Arc<dyn SubscriptionRepository>,
    events: Arc<dyn EventRepository>,
    sender: Arc<dyn WebhookSender>,
    config: DeliveryConfig,
    clock: Arc<dyn Clock>,
    stats: Arc<RwLock<EngineStats>>,
    scanning: AtomicBool,
    timer: Mutex<Option<CancellationToken>>,
}

impl DeliveryEngine {
    /// Creates a new engine. Nothing runs until [`start`](Self::start) or a
    /// direct [`scan_once`](Self::scan_once).
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        events: Arc<dyn EventRepository>,
        sender: Arc<dyn WebhookSender>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriptions,
            events,
            sender,
            config,
            clock,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            scanning: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Starts scanning every `poll_interval`, the first scan one full
    /// interval from now.
    ///
    /// Calling `start` again replaces the running timer. Must be called
    /// within a Tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.timer_slot().replace(token.clone()) {
            previous.cancel();
            debug!("replaced running delivery timer");
        }

        let period = self.config.poll_interval;
        let engine = Arc::downgrade(self);
        tokio::spawn(run_timer(engine, period, token));

        info!(poll_interval_ms = period.as_millis(), "delivery engine started");
    }

    /// Stops the timer. A scan already running is not interrupted.
    pub fn stop(&self) {
        if let Some(token) = self.timer_slot().take() {
            token.cancel();
            info!("delivery engine stopped");
        }
    }

    /// Whether the periodic timer is active.
    pub fn is_running(&self) -> bool {
        self.timer_slot().as_ref().is_some_and(|token| !token.is_cancelled())
    }

    /// Whether a scan is currently in progress.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Processes every due event once.
    ///
    /// Returns a skipped summary without touching storage when another scan
    /// is in progress. Errors on individual events are logged and counted,
    /// and never stop the remaining events from being processed.
    pub async fn scan_once(&self) -> ScanSummary {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("scan already in progress, skipping");
            self.stats.write().await.scans_skipped += 1;
            return ScanSummary::skipped();
        }
        let _guard = ScanGuard(&self.scanning);

        let mut summary = ScanSummary::default();
        let now = self.clock.now_utc();

        match self.events.find_due(now).await {
            Ok(due) => {
                if !due.is_empty() {
                    debug!(due = due.len(), "processing due events");
                }
                for event in due {
                    let event_id = event.id;
                    match self.process_event(event).await {
                        Ok(updated) => summary.record(updated.status),
                        Err(error) => {
                            summary.errors += 1;
                            error!(event_id = %event_id, error = %error, "event processing failed");
                        },
                    }
                }
            },
            Err(error) => {
                summary.errors += 1;
                error!(error = %error, "failed to load due events");
            },
        }

        {
            let mut stats = self.stats.write().await;
            stats.scans_completed += 1;
            stats.absorb(&summary);
        }

        if summary.processed > 0 || summary.errors > 0 {
            info!(
                processed = summary.processed,
                delivered = summary.delivered,
                retrying = summary.retrying,
                failed = summary.failed,
                errors = summary.errors,
                "scan completed"
            );
        }

        summary
    }

    /// Resets an event to `Pending` and attempts delivery right away.
    ///
    /// A `Retrying` event is attempted now instead of at its scheduled time.
    /// Runs regardless of whether a scan is in progress and returns the event
    /// as stored after the attempt.
    ///
    /// # Errors
    ///
    /// - `EventNotFound` if no event has this ID
    /// - `InvalidTransition` if the event is `Delivered`
    /// - `DatabaseError` if reading or writing the event fails
    #[tracing::instrument(skip_all, fields(event_id = %event_id))]
    pub async fn trigger_delivery(&self, event_id: EventId) -> Result<WebhookEvent> {
        let event = self
            .events
            .find_by_id(event_id)
            .await?
            .ok_or_else(|| DeliveryError::event_not_found(event_id))?;
        ensure_transition(&event, EventStatus::Pending)?;

        let reset = EventUpdate {
            status: Some(EventStatus::Pending),
            next_retry_at: Some(Some(self.clock.now_utc())),
            ..EventUpdate::default()
        };
        let event = self.events.update(event_id, reset).await?;
        info!(previous_attempts = event.attempts, "manual delivery triggered");

        let result = self.process_event(event).await;

        let mut summary = ScanSummary::default();
        match &result {
            Ok(updated) => summary.record(updated.status),
            Err(_) => summary.errors += 1,
        }
        {
            let mut stats = self.stats.write().await;
            stats.manual_triggers += 1;
            stats.absorb(&summary);
        }

        result
    }

    /// Runs one event through pickup, attempt and outcome recording.
    async fn process_event(&self, event: WebhookEvent) -> Result<WebhookEvent> {
        let subscription = match self.subscriptions.find_by_id(event.subscription_id).await? {
            Some(subscription) if subscription.enabled => subscription,
            Some(_) => return self.fail_at_pickup(&event, "Subscription is disabled").await,
            None => return self.fail_at_pickup(&event, "Subscription not found").await,
        };

        let in_flight = self.mark_in_flight(&event).await?;
        let outcome = self.sender.send(&subscription, &in_flight).await;

        self.record_outcome(&subscription, &in_flight, outcome).await
    }

    /// Terminally fails an event whose subscription cannot be used.
    async fn fail_at_pickup(&self, event: &WebhookEvent, reason: &str) -> Result<WebhookEvent> {
        ensure_transition(event, EventStatus::Failed)?;

        warn!(
            event_id = %event.id,
            subscription_id = %event.subscription_id,
            reason,
            "failing event at pickup"
        );

        let update = EventUpdate {
            status: Some(EventStatus::Failed),
            attempts: Some(event.attempts.saturating_add(1)),
            last_attempt_at: Some(Some(self.clock.now_utc())),
            error_message: Some(Some(reason.to_string())),
            next_retry_at: Some(None),
            ..EventUpdate::default()
        };

        Ok(self.events.update(event.id, update).await?)
    }

    /// Records the attempt before any network call.
    async fn mark_in_flight(&self, event: &WebhookEvent) -> Result<WebhookEvent> {
        ensure_transition(event, EventStatus::Retrying)?;

        let now = self.clock.now_utc();
        let lease = chrono::Duration::from_std(self.config.in_flight_lease)
            .map_err(|e| DeliveryError::configuration(format!("invalid in-flight lease: {e}")))?;

        let update = EventUpdate {
            status: Some(EventStatus::Retrying),
            attempts: Some(event.attempts.saturating_add(1)),
            last_attempt_at: Some(Some(now)),
            next_retry_at: Some(Some(now + lease)),
            ..EventUpdate::default()
        };

        Ok(self.events.update(event.id, update).await?)
    }

    /// Stores the attempt result and the next state.
    async fn record_outcome(
        &self,
        subscription: &Subscription,
        event: &WebhookEvent,
        outcome: DeliveryOutcome,
    ) -> Result<WebhookEvent> {
        let now = self.clock.now_utc();
        let mut update = EventUpdate {
            status_code: Some(outcome.status_code.map(i32::from)),
            response_body: Some(outcome.response_body),
            error_message: Some(outcome.error_message),
            duration_ms: Some(Some(i64::try_from(outcome.duration_ms).unwrap_or(i64::MAX))),
            ..EventUpdate::default()
        };

        if outcome.success {
            update.status = Some(EventStatus::Delivered);
            update.next_retry_at = Some(None);
            info!(event_id = %event.id, attempt = event.attempts, "event delivered");
        } else {
            let policy = RetryPolicy::for_subscription(subscription, &self.config.backoff_table);
            let attempts = u32::try_from(event.attempts).unwrap_or(0);

            match policy.decide(attempts, now) {
                RetryDecision::Retry { next_attempt_at } => {
                    update.status = Some(EventStatus::Retrying);
                    update.next_retry_at = Some(Some(next_attempt_at));
                    info!(
                        event_id = %event.id,
                        attempt = event.attempts,
                        status_code = ?outcome.status_code,
                        next_retry_at = %next_attempt_at,
                        "delivery failed, retry scheduled"
                    );
                },
                RetryDecision::GiveUp { reason } => {
                    update.status = Some(EventStatus::Failed);
                    update.next_retry_at = Some(None);
                    warn!(
                        event_id = %event.id,
                        attempt = event.attempts,
                        status_code = ?outcome.status_code,
                        reason = %reason,
                        "delivery failed permanently"
                    );
                },
            }
        }

        if let Some(next) = update.status {
            ensure_transition(event, next)?;
        }

        Ok(self.events.update(event.id, update).await?)
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        if let Some(token) = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
    }
}

fn ensure_transition(event: &WebhookEvent, next: EventStatus) -> Result<()> {
    if event.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(DeliveryError::invalid_transition(event.id, event.status, next))
    }
}

async fn run_timer(engine: Weak<DeliveryEngine>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(engine) = engine.upgrade() else { break };
                engine.scan_once().await;
            }
        }
    }

    debug!("delivery timer exited");
}
