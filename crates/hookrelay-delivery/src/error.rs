//! Error types for delivery operations.
//!
//! Transport failures never surface as errors: the client folds them into a
//! `DeliveryOutcome`. What remains are lookup failures, illegal state
//! transitions and storage faults, which the engine either logs (automatic
//! scans) or returns to the caller (manual triggers).

use hookrelay_core::{models::EventStatus, CoreError, EventId};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The event does not exist.
    #[error("event {event_id} not found")]
    EventNotFound {
        /// Identifier that was looked up
        event_id: EventId,
    },

    /// The requested status change is not allowed by the state machine.
    #[error("invalid transition for event {event_id}: {from} -> {to}")]
    InvalidTransition {
        /// Event being updated
        event_id: EventId,
        /// Current status
        from: EventStatus,
        /// Requested status
        to: EventStatus,
    },

    /// Network-level failure during an attempt.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Repository read or write failed.
    #[error("database error: {message}")]
    DatabaseError {
        /// Database error message
        message: String,
    },

    /// Invalid client or engine configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates an event-not-found error.
    pub fn event_not_found(event_id: EventId) -> Self {
        Self::EventNotFound { event_id }
    }

    /// Creates an invalid transition error.
    pub fn invalid_transition(event_id: EventId, from: EventStatus, to: EventStatus) -> Self {
        Self::InvalidTransition { event_id, from, to }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::DatabaseError { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        Self::database(err.to_string())
    }
}
