//! Delivery statistics handlers.

use std::collections::HashMap;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::{Duration, NaiveTime};
use hookrelay_core::{DailyOutcome, SubscriptionId};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    error::{ApiError, Result},
    AppState,
};

const DEFAULT_DAYS: u32 = 7;
const MAX_DAYS: u32 = 90;

/// Dashboard summary.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Number of subscriptions.
    pub total_subscriptions: usize,
    /// Events created in the last 24 hours and now delivered.
    pub delivered_last_24h: i64,
    /// Events created in the last 24 hours and now failed.
    pub failed_last_24h: i64,
    /// Delivered share of settled events in the last 24 hours, in percent
    /// with one decimal; 100 when none settled.
    pub success_rate: f64,
    /// Per-subscription totals over all events.
    pub subscription_success_rates: Vec<SubscriptionRate>,
}

/// Delivery totals of one subscription.
#[derive(Debug, Serialize)]
pub struct SubscriptionRate {
    /// Subscription identifier.
    pub subscription_id: SubscriptionId,
    /// Subscription name.
    pub subscription_name: String,
    /// Events created.
    pub total: i64,
    /// Events delivered.
    pub delivered: i64,
    /// Rounded delivered percentage.
    pub rate: i64,
}

/// Query for the per-day breakdown.
#[derive(Debug, Deserialize)]
pub struct DeliveryStatsParams {
    /// Days to include, today counting as one. Defaults to 7.
    pub days: Option<u32>,
}

/// Returns the dashboard summary.
#[instrument(name = "get_stats", skip(state))]
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let since = state.clock.now_utc() - Duration::hours(24);

    let total_subscriptions = state.subscriptions.list().await?.len();
    let counts = state.events.status_counts(since).await?;
    let outcomes = state.events.subscription_outcomes().await?;

    let subscription_success_rates = outcomes
        .into_iter()
        .map(|outcome| SubscriptionRate {
            rate: outcome.success_rate(),
            subscription_id: outcome.subscription_id,
            subscription_name: outcome.subscription_name,
            total: outcome.total,
            delivered: outcome.delivered,
        })
        .collect();

    Ok(Json(StatsResponse {
        total_subscriptions,
        delivered_last_24h: counts.delivered,
        failed_last_24h: counts.failed,
        success_rate: success_rate(counts.delivered, counts.failed),
        subscription_success_rates,
    }))
}

/// Returns delivered and failed counts for each of the last `days` days,
/// oldest first, with zero rows for days without events.
///
/// # Errors
///
/// - 400: `days` outside `1..=90`
#[instrument(name = "get_delivery_stats", skip(state, params))]
pub async fn get_delivery_stats(
    State(state): State<AppState>,
    params: std::result::Result<Query<DeliveryStatsParams>, QueryRejection>,
) -> Result<Json<Vec<DailyOutcome>>> {
    let Query(params) = params?;
    let days = params.days.unwrap_or(DEFAULT_DAYS);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(ApiError::bad_request(format!("days must be between 1 and {MAX_DAYS}")));
    }

    let today = state.clock.now_utc().date_naive();
    let first_day = today - Duration::days(i64::from(days - 1));
    let since = first_day.and_time(NaiveTime::MIN).and_utc();

    let recorded: HashMap<_, _> = state
        .events
        .daily_outcomes(since)
        .await?
        .into_iter()
        .map(|outcome| (outcome.date, outcome))
        .collect();

    let series = first_day
        .iter_days()
        .take(days as usize)
        .map(|date| {
            recorded.get(&date).copied().unwrap_or(DailyOutcome { date, delivered: 0, failed: 0 })
        })
        .collect();

    Ok(Json(series))
}

fn success_rate(delivered: i64, failed: i64) -> f64 {
    let settled = delivered + failed;
    if settled == 0 {
        return 100.0;
    }
    (delivered as f64 / settled as f64 * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_rounds_to_one_decimal() {
        assert_eq!(success_rate(0, 0), 100.0);
        assert_eq!(success_rate(1, 2), 33.3);
        assert_eq!(success_rate(2, 1), 66.7);
        assert_eq!(success_rate(5, 0), 100.0);
    }
}
