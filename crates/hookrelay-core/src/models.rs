//! Core domain models and strongly-typed identifiers.
//!
//! Defines subscriptions (where and how to deliver), webhook events (what to
//! deliver and how far delivery has progressed), the event state machine and
//! the partial-update types the repositories accept.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Smallest accepted fixed retry interval in seconds.
pub const MIN_RETRY_INTERVAL_SECS: i32 = 5;

/// Largest accepted fixed retry interval in seconds.
pub const MAX_RETRY_INTERVAL_SECS: i32 = 3600;

/// Largest accepted retry limit.
pub const MAX_RETRY_LIMIT: i32 = 10;

/// Retry limit applied when a subscription is created without one.
pub const DEFAULT_RETRY_LIMIT: i32 = 3;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_id!(
    /// Strongly-typed subscription identifier.
    SubscriptionId
);

uuid_id!(
    /// Strongly-typed event identifier.
    ///
    /// Follows an event through its whole lifecycle and is sent to receivers
    /// in the `X-Event-Id` header so they can deduplicate redeliveries.
    EventId
);

/// HTTP methods a subscription may deliver with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// HTTP GET method.
    Get,
    /// HTTP POST method (default).
    #[default]
    Post,
    /// HTTP PUT method.
    Put,
    /// HTTP PATCH method.
    Patch,
    /// HTTP DELETE method.
    Delete,
}

impl HttpMethod {
    /// Returns the canonical method name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(CoreError::invalid(format!("invalid http method: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for HttpMethod {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for HttpMethod {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl sqlx::Encode<'_, PgDb> for HttpMethod {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Event lifecycle status.
///
/// ```text
/// Pending --pickup--> Retrying --2xx--------------> Delivered
///    |                  |  ^
///    |                  |  +--failure, attempts left (next_retry_at set)
///    |                  +-----failure, limit reached--> Failed
///    +--subscription missing/disabled---------------> Failed
/// Failed | Retrying --manual trigger--> Pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Queued and never attempted, or reset by a manual trigger.
    Pending,

    /// An attempt is in flight, or failed with attempts remaining.
    Retrying,

    /// Terminal success.
    Delivered,

    /// Terminal failure: retries exhausted or subscription unusable.
    ///
    /// Only a manual trigger moves an event out of this state.
    Failed,
}

impl EventStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Retrying, Self::Delivered, Self::Failed];

    /// Returns the canonical lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Whether the automatic scan leaves events in this status alone.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Failed -> Pending` and `Retrying -> Pending` are legal here but only
    /// the manual trigger path ever requests them.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Retrying | Self::Failed | Self::Pending)
                | (
                    Self::Retrying,
                    Self::Retrying | Self::Delivered | Self::Failed | Self::Pending
                )
                | (Self::Failed, Self::Pending)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::invalid(format!("invalid event status: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for EventStatus {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventStatus {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl sqlx::Encode<'_, PgDb> for EventStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Extra request headers configured on a subscription, ordered by name.
pub type HeaderMap = BTreeMap<String, String>;

/// A configured delivery destination and its retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    /// Unique identifier.
    pub id: SubscriptionId,

    /// Human-readable name.
    pub name: String,

    /// Optional free-form description.
    pub description: Option<String>,

    /// Destination URL.
    pub url: String,

    /// HTTP method used for deliveries.
    pub method: HttpMethod,

    /// Extra headers sent with every delivery.
    pub headers: sqlx::types::Json<HeaderMap>,

    /// Disabled subscriptions fail their events at pickup.
    pub enabled: bool,

    /// Additional attempts allowed after the first, in `[0, 10]`.
    pub retry_limit: i32,

    /// Fixed retry interval in seconds, in `[5, 3600]`.
    ///
    /// `None` selects the escalating backoff table.
    pub retry_interval_secs: Option<i32>,

    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Configured headers as a plain map.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers.0
    }

    /// Checks the subscription invariants.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_url(&self.url)?;
        validate_retry_limit(self.retry_limit)?;
        if let Some(interval) = self.retry_interval_secs {
            validate_retry_interval(interval)?;
        }
        Ok(())
    }
}

/// Fields for creating a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Destination URL.
    pub url: String,
    /// HTTP method, POST when omitted.
    #[serde(default)]
    pub method: HttpMethod,
    /// Extra headers.
    #[serde(default)]
    pub headers: HeaderMap,
    /// Enabled flag, true when omitted.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Retry limit, 3 when omitted.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: i32,
    /// Fixed retry interval in seconds.
    #[serde(default)]
    pub retry_interval_secs: Option<i32>,
}

impl NewSubscription {
    /// Creates a POST subscription with default retry settings.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            url: url.into(),
            method: HttpMethod::Post,
            headers: HeaderMap::new(),
            enabled: true,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_interval_secs: None,
        }
    }

    /// Builds the stored subscription with the given identity.
    pub fn into_subscription(self, id: SubscriptionId, created_at: DateTime<Utc>) -> Subscription {
        Subscription {
            id,
            name: self.name,
            description: self.description,
            url: self.url,
            method: self.method,
            headers: sqlx::types::Json(self.headers),
            enabled: self.enabled,
            retry_limit: self.retry_limit,
            retry_interval_secs: self.retry_interval_secs,
            created_at,
        }
    }
}

/// Partial subscription update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description; `Some(None)` clears it.
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    /// New URL.
    #[serde(default)]
    pub url: Option<String>,
    /// New method.
    #[serde(default)]
    pub method: Option<HttpMethod>,
    /// Replacement header map.
    #[serde(default)]
    pub headers: Option<HeaderMap>,
    /// New enabled flag.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// New retry limit.
    #[serde(default)]
    pub retry_limit: Option<i32>,
    /// New fixed interval; `Some(None)` switches back to the backoff table.
    #[serde(default, deserialize_with = "double_option")]
    pub retry_interval_secs: Option<Option<i32>>,
}

impl SubscriptionUpdate {
    /// Applies the present fields to `subscription`.
    pub fn apply_to(&self, subscription: &mut Subscription) {
        if let Some(name) = &self.name {
            subscription.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            subscription.description.clone_from(description);
        }
        if let Some(url) = &self.url {
            subscription.url.clone_from(url);
        }
        if let Some(method) = self.method {
            subscription.method = method;
        }
        if let Some(headers) = &self.headers {
            subscription.headers = sqlx::types::Json(headers.clone());
        }
        if let Some(enabled) = self.enabled {
            subscription.enabled = enabled;
        }
        if let Some(retry_limit) = self.retry_limit {
            subscription.retry_limit = retry_limit;
        }
        if let Some(interval) = self.retry_interval_secs {
            subscription.retry_interval_secs = interval;
        }
    }
}

/// One notification queued for delivery to a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEvent {
    /// Unique identifier.
    pub id: EventId,

    /// Subscription this event is delivered to.
    pub subscription_id: SubscriptionId,

    /// Dot-delimited category, e.g. `order.paid`.
    pub event_type: String,

    /// Opaque payload forwarded to the receiver.
    pub payload: sqlx::types::Json<serde_json::Value>,

    /// Current lifecycle status.
    pub status: EventStatus,

    /// Delivery attempts made so far, incremented before each network call.
    pub attempts: i32,

    /// HTTP status of the most recent completed attempt.
    pub status_code: Option<i32>,

    /// Truncated response body of the most recent completed attempt.
    pub response_body: Option<String>,

    /// Error of the most recent attempt that failed without a response.
    pub error_message: Option<String>,

    /// Duration of the most recent attempt in milliseconds.
    pub duration_ms: Option<i64>,

    /// Creation time; scans process events oldest first.
    pub created_at: DateTime<Utc>,

    /// Time of the most recent attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Time the next attempt becomes due.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    /// Payload as a JSON value.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload.0
    }

    /// Whether an automatic scan at `now` should pick this event up.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            EventStatus::Pending => true,
            EventStatus::Retrying => self.next_retry_at.is_some_and(|at| at <= now),
            EventStatus::Delivered | EventStatus::Failed => false,
        }
    }
}

/// Fields for creating an event. New events always start `Pending`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Target subscription.
    pub subscription_id: SubscriptionId,
    /// Event type label.
    pub event_type: String,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl NewEvent {
    /// Creates the fields for a new pending event.
    pub fn new(
        subscription_id: SubscriptionId,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self { subscription_id, event_type: event_type.into(), payload, created_at }
    }

    /// Checks the event type label and payload shape.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for an empty type or a non-object
    /// payload.
    pub fn validate(&self) -> Result<()> {
        if self.event_type.trim().is_empty() {
            return Err(CoreError::invalid("event type is required"));
        }
        if !self.payload.is_object() {
            return Err(CoreError::invalid("payload must be a JSON object"));
        }
        Ok(())
    }

    /// Builds the stored event with the given identity.
    pub fn into_event(self, id: EventId) -> WebhookEvent {
        WebhookEvent {
            id,
            subscription_id: self.subscription_id,
            event_type: self.event_type,
            payload: sqlx::types::Json(self.payload),
            status: EventStatus::Pending,
            attempts: 0,
            status_code: None,
            response_body: None,
            error_message: None,
            duration_ms: None,
            created_at: self.created_at,
            last_attempt_at: None,
            next_retry_at: None,
        }
    }
}

/// Partial update of an event's mutable delivery state.
///
/// Nullable columns use `Option<Option<T>>`: `None` leaves the column alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventUpdate {
    /// New status.
    pub status: Option<EventStatus>,
    /// New attempt count.
    pub attempts: Option<i32>,
    /// Last HTTP status code.
    pub status_code: Option<Option<i32>>,
    /// Last response body.
    pub response_body: Option<Option<String>>,
    /// Last error message.
    pub error_message: Option<Option<String>>,
    /// Last attempt duration.
    pub duration_ms: Option<Option<i64>>,
    /// Last attempt time.
    pub last_attempt_at: Option<Option<DateTime<Utc>>>,
    /// Next attempt time.
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
}

impl EventUpdate {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the present fields to `event`.
    pub fn apply_to(&self, event: &mut WebhookEvent) {
        if let Some(status) = self.status {
            event.status = status;
        }
        if let Some(attempts) = self.attempts {
            event.attempts = attempts;
        }
        if let Some(status_code) = self.status_code {
            event.status_code = status_code;
        }
        if let Some(response_body) = &self.response_body {
            event.response_body.clone_from(response_body);
        }
        if let Some(error_message) = &self.error_message {
            event.error_message.clone_from(error_message);
        }
        if let Some(duration_ms) = self.duration_ms {
            event.duration_ms = duration_ms;
        }
        if let Some(last_attempt_at) = self.last_attempt_at {
            event.last_attempt_at = last_attempt_at;
        }
        if let Some(next_retry_at) = self.next_retry_at {
            event.next_retry_at = next_retry_at;
        }
    }
}

/// Pagination window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Maximum rows returned.
    pub limit: u32,
    /// Rows skipped.
    pub offset: u32,
}

impl Page {
    /// Default number of rows per page.
    pub const DEFAULT_LIMIT: u32 = 50;

    /// Largest accepted page size.
    pub const MAX_LIMIT: u32 = 500;

    /// Creates a page, clamping the limit to `[1, MAX_LIMIT]`.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit: limit.clamp(1, Self::MAX_LIMIT), offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: Self::DEFAULT_LIMIT, offset: 0 }
    }
}

/// Event counts by status over a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// All events in the window.
    pub total: i64,
    /// Pending events.
    pub pending: i64,
    /// Retrying events.
    pub retrying: i64,
    /// Delivered events.
    pub delivered: i64,
    /// Failed events.
    pub failed: i64,
}

/// Delivered and failed counts for one calendar day (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyOutcome {
    /// Day the events were created.
    pub date: NaiveDate,
    /// Events delivered.
    pub delivered: i64,
    /// Events failed.
    pub failed: i64,
}

/// Delivery totals for one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriptionOutcome {
    /// Subscription identifier.
    pub subscription_id: SubscriptionId,
    /// Subscription name.
    pub subscription_name: String,
    /// Events created for the subscription.
    pub total: i64,
    /// Events delivered.
    pub delivered: i64,
}

impl SubscriptionOutcome {
    /// Delivered share in percent, rounded; 100 when nothing was sent.
    pub fn success_rate(&self) -> i64 {
        if self.total == 0 {
            return 100;
        }
        (self.delivered * 100 + self.total / 2) / self.total
    }
}

fn default_enabled() -> bool {
    true
}

fn default_retry_limit() -> i32 {
    DEFAULT_RETRY_LIMIT
}

fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CoreError::invalid("name is required"));
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| CoreError::invalid(format!("url must be http or https: {url}")))?;
    if rest.is_empty() || rest.starts_with('/') || url.chars().any(char::is_whitespace) {
        return Err(CoreError::invalid(format!("invalid url: {url}")));
    }
    Ok(())
}

fn validate_retry_limit(limit: i32) -> Result<()> {
    if !(0..=MAX_RETRY_LIMIT).contains(&limit) {
        return Err(CoreError::invalid(format!(
            "retry limit must be between 0 and {MAX_RETRY_LIMIT}, got {limit}"
        )));
    }
    Ok(())
}

fn validate_retry_interval(interval: i32) -> Result<()> {
    if !(MIN_RETRY_INTERVAL_SECS..=MAX_RETRY_INTERVAL_SECS).contains(&interval) {
        return Err(CoreError::invalid(format!(
            "retry interval must be between {MIN_RETRY_INTERVAL_SECS} and \
             {MAX_RETRY_INTERVAL_SECS} seconds, got {interval}"
        )));
    }
    Ok(())
}
