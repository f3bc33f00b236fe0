//! Registration, on-demand sync, and deletion handlers.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::models::{User, UserProfile};
use crate::state::AppState;
use crate::sync::StepOutcome;
use crate::web::response::{ApiError, ApiResponse, db_error, outcome_response};

#[derive(Debug, Deserialize)]
pub struct RegisterParams {
    pub user_id: String,
    pub department: Option<String>,
    pub year: Option<String>,
    pub division: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserParams {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteReport {
    pub username: String,
    pub removed: u64,
    pub calendar_cleared: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn validate_username(raw: &str) -> Result<&str, ApiError> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "user_id must not be empty",
        ));
    }
    Ok(username)
}

/// Active user by name, or 404.
async fn require_user(state: &AppState, username: &str) -> Result<User, ApiError> {
    match state.users.find(username).await {
        Ok(Some(user)) if user.active => Ok(user),
        Ok(_) => Err(ApiError::unknown_user(username)),
        Err(e) => Err(db_error("User lookup", e)),
    }
}

/// `GET /?user_id=..`
///
/// Registers (or reactivates) the user, then checks mailbox access so the
/// caller learns immediately whether consent is needed.
pub(super) async fn register(
    State(state): State<AppState>,
    Query(params): Query<RegisterParams>,
) -> Result<Response, ApiError> {
    let username = validate_username(&params.user_id)?;
    let profile = UserProfile {
        username: username.to_owned(),
        department: non_empty(params.department),
        year: non_empty(params.year),
        division: non_empty(params.division),
    };

    let user = state
        .users
        .upsert(&profile)
        .await
        .map_err(|e| db_error("User registration", e))?;
    info!(username = %user.username, "User registered");

    let outcome = state.pipeline.gate().check(&user.username).await.map(|()| user);
    Ok(outcome_response(outcome, StatusCode::NOT_FOUND))
}

/// `GET /home?user_id=..`: run the full sync for one user now.
pub(super) async fn home(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Response, ApiError> {
    let username = validate_username(&params.user_id)?;
    let user = require_user(&state, username).await?;

    let outcome = state.pipeline.sync_user(&user).await;
    Ok(outcome_response(outcome, StatusCode::NO_CONTENT))
}

/// `GET /delete?user_id=..`
///
/// Drops the stored timetable and the calendar events, deactivates the user,
/// and forgets their Google credentials.
pub(super) async fn delete(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Response, ApiError> {
    let username = validate_username(&params.user_id)?;
    let user = require_user(&state, username).await?;

    let cleared = match state.pipeline.writer().clear(&user.username).await {
        StepOutcome::Success(report) => report,
        other => return Ok(outcome_response(other, StatusCode::NOT_FOUND)),
    };

    state
        .users
        .deactivate(&user.username)
        .await
        .map_err(|e| db_error("User deactivation", e))?;
    if let Err(e) = state.credentials.revoke(&user.username).await {
        warn!(username = %user.username, error = ?e, "Failed to delete stored credentials");
    }
    info!(
        username = %user.username,
        removed = cleared.removed,
        calendar_cleared = cleared.calendar_cleared,
        "User deleted"
    );

    Ok(Json(ApiResponse::success(DeleteReport {
        username: user.username,
        removed: cleared.removed,
        calendar_cleared: cleared.calendar_cleared,
    }))
    .into_response())
}
