//! OAuth consent callback.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::google::GoogleApiError;
use crate::state::AppState;
use crate::web::response::{ApiError, ApiResponse, db_error};

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    /// Single-use token issued with the consent URL.
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Authorized {
    pub username: String,
}

/// `GET /auth/callback?code=..&state=..`
pub(super) async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<ApiResponse<Authorized>>, ApiError> {
    if let Some(error) = params.error {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "consent_denied",
            format!("Google consent was not granted: {error}"),
        ));
    }
    let (Some(code), Some(consent_state)) = (params.code, params.state) else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "code and state are required",
        ));
    };

    let claimed = state
        .credentials
        .claim_state(&consent_state)
        .await
        .map_err(|e| db_error("Consent state lookup", e))?;
    let Some(username) = claimed else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            "Consent link is no longer valid, start consent again",
        ));
    };

    let known = state
        .users
        .find(&username)
        .await
        .map_err(|e| db_error("User lookup", e))?;
    if known.is_none() {
        return Err(ApiError::unknown_user(&username));
    }

    match state.credentials.exchange_code(&username, &code).await {
        Ok(()) => Ok(Json(ApiResponse::success(Authorized { username }))),
        Err(GoogleApiError::Unauthorized(_)) => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "Authorization code was rejected, start consent again",
        )),
        Err(e) => {
            warn!(username, error = ?e, "Code exchange failed");
            Err(ApiError::new(
                StatusCode::BAD_GATEWAY,
                "transport_error",
                "Could not reach Google to complete authorization",
            ))
        }
    }
}
