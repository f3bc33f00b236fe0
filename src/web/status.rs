//! Health and status handlers.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::trace;

use crate::state::{AppState, CycleRecord, ServiceStatus};

#[derive(Serialize)]
pub struct ServiceInfo {
    status: ServiceStatus,
    updated_secs_ago: u64,
}

#[derive(Serialize)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    services: BTreeMap<String, ServiceInfo>,
    last_cycle: Option<CycleRecord>,
}

/// Health check endpoint
pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Service statuses, build info, and the last poll cycle.
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let services: BTreeMap<String, ServiceInfo> = state
        .service_statuses
        .all()
        .into_iter()
        .map(|(name, status, updated_secs_ago)| {
            (
                name,
                ServiceInfo {
                    status,
                    updated_secs_ago,
                },
            )
        })
        .collect();

    let overall_status = if services
        .values()
        .any(|s| matches!(s.status, ServiceStatus::Error))
    {
        ServiceStatus::Error
    } else if services.is_empty() {
        ServiceStatus::Disabled
    } else if services
        .values()
        .any(|s| matches!(s.status, ServiceStatus::Starting))
    {
        ServiceStatus::Starting
    } else {
        ServiceStatus::Active
    };

    Json(StatusResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_HASH").to_string(),
        services,
        last_cycle: state.last_cycle.get().await,
    })
}
