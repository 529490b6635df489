//! Subscription management handlers.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use hookrelay_core::{
    NewSubscription, Subscription, SubscriptionId, SubscriptionUpdate, WebhookEvent,
};
use tracing::{info, instrument};

use super::PageParams;
use crate::{
    error::{ApiError, Result},
    AppState,
};

/// Lists all subscriptions, newest first.
#[instrument(name = "list_subscriptions", skip(state))]
pub async fn list_subscriptions(State(state): State<AppState>) -> Result<Json<Vec<Subscription>>> {
    Ok(Json(state.subscriptions.list().await?))
}

/// Creates a subscription.
///
/// # Errors
///
/// - 400: malformed body or invalid name, URL, retry limit or interval
#[instrument(name = "create_subscription", skip_all)]
pub async fn create_subscription(
    State(state): State<AppState>,
    payload: std::result::Result<Json<NewSubscription>, JsonRejection>,
) -> Result<(StatusCode, Json<Subscription>)> {
    let Json(new) = payload?;
    let subscription = state.subscriptions.create(new).await?;

    info!(
        subscription_id = %subscription.id,
        url = %subscription.url,
        "Subscription created"
    );

    Ok((StatusCode::CREATED, Json(subscription)))
}

/// Returns one subscription.
#[instrument(name = "get_subscription", skip(state, path))]
pub async fn get_subscription(
    State(state): State<AppState>,
    path: std::result::Result<Path<SubscriptionId>, PathRejection>,
) -> Result<Json<Subscription>> {
    let Path(id) = path?;
    let subscription = state
        .subscriptions
        .find_by_id(id)
        .await?
        .ok_or_else(|| subscription_not_found(id))?;

    Ok(Json(subscription))
}

/// Applies a partial update.
///
/// Fields absent from the body are left unchanged; `null` clears the
/// description or the fixed retry interval.
#[instrument(name = "update_subscription", skip(state, payload, path))]
pub async fn update_subscription(
    State(state): State<AppState>,
    path: std::result::Result<Path<SubscriptionId>, PathRejection>,
    payload: std::result::Result<Json<SubscriptionUpdate>, JsonRejection>,
) -> Result<Json<Subscription>> {
    let Path(id) = path?;
    let Json(changes) = payload?;
    let subscription = state.subscriptions.update(id, changes).await?;

    info!(subscription_id = %id, "Subscription updated");

    Ok(Json(subscription))
}

/// Deletes a subscription together with its events.
#[instrument(name = "delete_subscription", skip(state, path))]
pub async fn delete_subscription(
    State(state): State<AppState>,
    path: std::result::Result<Path<SubscriptionId>, PathRejection>,
) -> Result<StatusCode> {
    let Path(id) = path?;
    if !state.subscriptions.delete(id).await? {
        return Err(subscription_not_found(id));
    }

    info!(subscription_id = %id, "Subscription deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Lists the events of one subscription, newest first.
#[instrument(name = "list_subscription_events", skip(state, params, path))]
pub async fn list_subscription_events(
    State(state): State<AppState>,
    path: std::result::Result<Path<SubscriptionId>, PathRejection>,
    params: std::result::Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Vec<WebhookEvent>>> {
    let Path(id) = path?;
    let Query(params) = params?;

    if state.subscriptions.find_by_id(id).await?.is_none() {
        return Err(subscription_not_found(id));
    }

    Ok(Json(state.events.list_by_subscription(id, params.page()).await?))
}

fn subscription_not_found(id: SubscriptionId) -> ApiError {
    ApiError::not_found(format!("subscription {id} not found"))
}
