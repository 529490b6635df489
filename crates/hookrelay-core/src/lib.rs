//! Core domain models, storage and time primitives.
//!
//! Provides the subscription and event models, the event state machine, the
//! repository traits with their PostgreSQL and in-memory implementations, and
//! the clock abstraction. The delivery engine and the HTTP API both build on
//! these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    DailyOutcome, EventId, EventStatus, EventUpdate, HeaderMap, HttpMethod, NewEvent,
    NewSubscription, Page, StatusCounts, Subscription, SubscriptionId, SubscriptionOutcome,
    SubscriptionUpdate, WebhookEvent,
};
pub use storage::{EventRepository, Storage, SubscriptionRepository};
pub use time::{Clock, RealClock, TestClock};
