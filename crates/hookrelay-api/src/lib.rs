//! HookRelay HTTP API.
//!
//! Subscription management, event creation and inspection, manual retries
//! and delivery statistics over JSON, plus the service configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use hookrelay_core::{Clock, EventRepository, Storage, SubscriptionRepository};
use hookrelay_delivery::DeliveryEngine;

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Subscription repository.
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    /// Event repository.
    pub events: Arc<dyn EventRepository>,
    /// Delivery engine for scans and manual retries.
    pub engine: Arc<DeliveryEngine>,
    /// Time source for timestamps and statistics windows.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates state from explicit repositories.
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        events: Arc<dyn EventRepository>,
        engine: Arc<DeliveryEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { subscriptions, events, engine, clock }
    }

    /// Creates state backed by the PostgreSQL repositories.
    pub fn from_storage(
        storage: &Storage,
        engine: Arc<DeliveryEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(storage.subscriptions.clone(), storage.webhook_events.clone(), engine, clock)
    }
}
