//! Health check handler.
//!
//! Reports liveness together with the delivery engine's timer state.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: HealthStatus,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
    /// Delivery engine state.
    pub engine: EngineHealth,
    /// Service version.
    pub version: String,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving requests and delivering events.
    Healthy,
    /// Serving requests, but the engine timer is not running.
    Degraded,
}

/// Delivery engine state.
#[derive(Debug, Serialize)]
pub struct EngineHealth {
    /// Whether the periodic timer is active.
    pub running: bool,
    /// Whether a scan is in progress.
    pub scanning: bool,
    /// Completed scans since startup.
    pub scans_completed: u64,
    /// Events processed since startup.
    pub events_processed: u64,
}

/// Health check endpoint.
///
/// Always answers 200 while the process serves HTTP; a stopped engine is
/// reported as `degraded` in the body.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.engine.stats().await;
    let running = state.engine.is_running();

    let response = HealthResponse {
        status: if running { HealthStatus::Healthy } else { HealthStatus::Degraded },
        timestamp: state.clock.now_utc(),
        engine: EngineHealth {
            running,
            scanning: state.engine.is_scanning(),
            scans_completed: stats.scans_completed,
            events_processed: stats.events_processed,
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    debug!(status = ?response.status, "Health check completed");

    Json(response)
}
