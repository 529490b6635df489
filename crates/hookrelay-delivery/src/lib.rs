//! Webhook delivery engine with scheduled retries.
//!
//! This crate turns stored events into HTTP requests and drives each event
//! through its lifecycle until it is delivered or permanently failed.
//!
//! # Architecture
//!
//! A single periodic scan, guarded so at most one runs at a time, handles
//! every due event:
//!
//! 1. **Find Due** - load `Pending` events and `Retrying` events whose
//!    `next_retry_at` has passed, oldest first
//! 2. **Check Subscription** - a missing or disabled subscription fails the
//!    event immediately
//! 3. **Mark In Flight** - count the attempt and push `next_retry_at` out by
//!    a lease before any network call
//! 4. **Deliver** - one HTTP request with a bounded timeout
//! 5. **Record Outcome** - delivered, rescheduled by the retry policy, or
//!    failed once the retry limit is exhausted
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookrelay_core::{storage::Storage, RealClock};
//! use hookrelay_delivery::{client::DeliveryClient, DeliveryConfig, DeliveryEngine};
//!
//! # async fn example(storage: Storage) -> hookrelay_delivery::Result<()> {
//! let config = DeliveryConfig::default();
//! let client = DeliveryClient::new(config.client_config.clone())?;
//! let engine = Arc::new(DeliveryEngine::new(
//!     storage.subscriptions.clone(),
//!     storage.webhook_events.clone(),
//!     Arc::new(client),
//!     config,
//!     Arc::new(RealClock::new()),
//! ));
//!
//! engine.start();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod retry;

pub use engine::{DeliveryConfig, DeliveryEngine, EngineStats, ScanSummary};
pub use error::{DeliveryError, Result};

/// Default interval between automatic scans in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Default lease on an in-flight attempt in seconds.
pub const DEFAULT_IN_FLIGHT_LEASE_SECS: u64 = 60;

/// Default escalating retry delays in seconds, used when a subscription has
/// no fixed retry interval.
pub const DEFAULT_BACKOFF_TABLE_SECS: [u64; 3] = [60, 300, 900];
