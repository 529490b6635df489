//! Event creation, inspection and manual retry handlers.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use hookrelay_core::{EventId, NewEvent, SubscriptionId, WebhookEvent};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::PageParams;
use crate::{
    error::{ApiError, Result},
    AppState,
};

/// Request body for creating an event.
#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    /// Subscription the event is delivered to.
    pub subscription_id: SubscriptionId,
    /// Dot-delimited event category.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload forwarded to the receiver; must be a JSON object.
    pub payload: serde_json::Value,
}

/// Lists all events, newest first.
#[instrument(name = "list_events", skip(state, params))]
pub async fn list_events(
    State(state): State<AppState>,
    params: std::result::Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Vec<WebhookEvent>>> {
    let Query(params) = params?;
    Ok(Json(state.events.list(params.page()).await?))
}

/// Returns one event with its delivery state.
#[instrument(name = "get_event", skip(state, path))]
pub async fn get_event(
    State(state): State<AppState>,
    path: std::result::Result<Path<EventId>, PathRejection>,
) -> Result<Json<WebhookEvent>> {
    let Path(id) = path?;
    let event = state
        .events
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("event {id} not found")))?;

    Ok(Json(event))
}

/// Queues a new event and starts a scan without waiting for the next tick.
///
/// # Errors
///
/// - 400: malformed body, empty type or non-object payload
/// - 404: subscription does not exist
#[instrument(name = "create_event", skip_all)]
pub async fn create_event(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<WebhookEvent>)> {
    let Json(request) = payload?;

    if state.subscriptions.find_by_id(request.subscription_id).await?.is_none() {
        return Err(ApiError::not_found(format!(
            "subscription {} not found",
            request.subscription_id
        )));
    }

    let new = NewEvent::new(
        request.subscription_id,
        request.event_type,
        request.payload,
        state.clock.now_utc(),
    );
    let event = state.events.create(new).await?;

    info!(
        event_id = %event.id,
        subscription_id = %event.subscription_id,
        event_type = %event.event_type,
        "Event queued"
    );

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let summary = engine.scan_once().await;
        debug!(skipped = summary.skipped, processed = summary.processed, "Immediate scan finished");
    });

    Ok((StatusCode::CREATED, Json(event)))
}

/// Attempts delivery of one event right away and returns the result.
///
/// # Errors
///
/// - 400: malformed event ID
/// - 404: event does not exist
/// - 409: event is already delivered
/// - 500: storage failure
#[instrument(name = "retry_event", skip(state, path))]
pub async fn retry_event(
    State(state): State<AppState>,
    path: std::result::Result<Path<EventId>, PathRejection>,
) -> Result<Json<WebhookEvent>> {
    let Path(id) = path?;
    let event = state.engine.trigger_delivery(id).await?;
    Ok(Json(event))
}
