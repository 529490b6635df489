//! HTTP request handlers for the HookRelay API.
//!
//! Handlers are grouped by resource:
//! - `health` - liveness and engine status
//! - `subscriptions` - subscription CRUD and per-subscription event lists
//! - `events` - event creation, inspection and manual retries
//! - `stats` - delivery statistics
//!
//! Every handler returns [`crate::error::Result`], so failures share the
//! JSON error format of [`crate::ApiError`].

use hookrelay_core::Page;
use serde::Deserialize;

pub mod events;
pub mod health;
pub mod stats;
pub mod subscriptions;

pub use events::{create_event, get_event, list_events, retry_event};
pub use health::health_check;
pub use stats::{get_delivery_stats, get_stats};
pub use subscriptions::{
    create_subscription, delete_subscription, get_subscription, list_subscription_events,
    list_subscriptions, update_subscription,
};

/// `limit` and `offset` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    /// Maximum rows to return.
    pub limit: Option<u32>,
    /// Rows to skip.
    pub offset: Option<u32>,
}

impl PageParams {
    fn page(&self) -> Page {
        Page::new(self.limit.unwrap_or(Page::DEFAULT_LIMIT), self.offset.unwrap_or(0))
    }
}
