//! Uniform JSON envelope and outcome-to-status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::sync::{OutcomeKind, StepOutcome, SyncError};

/// Body shape for every API response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: OutcomeKind::Success,
            data: Some(data),
            redirect_url: None,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn auth_required(redirect_url: String) -> Self {
        Self {
            status: OutcomeKind::AuthRequired,
            data: None,
            redirect_url: Some(redirect_url),
            error: None,
        }
    }

    pub fn error(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: OutcomeKind::Error,
            data: None,
            redirect_url: None,
            error: Some(ErrorBody {
                kind,
                message: message.into(),
            }),
        }
    }
}

/// A request-level failure (bad input, unknown user, storage down).
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_user(username: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "unknown_user",
            format!("No user named '{username}'"),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::error(self.kind, self.message))).into_response()
    }
}

/// Log a storage failure and turn it into a 500.
pub fn db_error(context: &str, error: anyhow::Error) -> ApiError {
    tracing::error!(error = ?error, context, "Database operation failed");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "persistence_failure",
        format!("{context} failed"),
    )
}

/// HTTP status for a failed step: storage faults are ours (500), everything
/// else is an upstream fault (502).
pub fn error_status(error: &SyncError) -> StatusCode {
    match error {
        SyncError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// Map a step outcome onto a response. `NotFound` becomes `not_found_status`
/// with no body.
pub fn outcome_response<T: Serialize>(
    outcome: StepOutcome<T>,
    not_found_status: StatusCode,
) -> Response {
    match outcome {
        StepOutcome::Success(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        StepOutcome::AuthRequired { redirect_url } => (
            StatusCode::NETWORK_AUTHENTICATION_REQUIRED,
            Json(ApiResponse::auth_required(redirect_url)),
        )
            .into_response(),
        StepOutcome::NotFound => not_found_status.into_response(),
        StepOutcome::Error(e) => (
            error_status(&e),
            Json(ApiResponse::error(e.kind(), e.to_string())),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn maps_outcomes_to_statuses() {
        let ok = outcome_response(StepOutcome::Success(1), StatusCode::NO_CONTENT);
        assert_eq!(ok.status(), StatusCode::OK);

        let auth = outcome_response::<()>(
            StepOutcome::AuthRequired {
                redirect_url: "https://example.test/consent".into(),
            },
            StatusCode::NO_CONTENT,
        );
        assert_eq!(auth.status(), StatusCode::NETWORK_AUTHENTICATION_REQUIRED);

        let none = outcome_response::<()>(StepOutcome::NotFound, StatusCode::NO_CONTENT);
        assert_eq!(none.status(), StatusCode::NO_CONTENT);

        let timeout = outcome_response::<()>(
            StepOutcome::Error(SyncError::Timeout {
                step: "mail_fetch",
                after: Duration::from_secs(1),
            }),
            StatusCode::NO_CONTENT,
        );
        assert_eq!(timeout.status(), StatusCode::BAD_GATEWAY);

        let store = outcome_response::<()>(
            StepOutcome::Error(SyncError::persistence(
                "timetable_replace",
                anyhow::anyhow!("disk full"),
            )),
            StatusCode::NO_CONTENT,
        );
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn envelope_skips_empty_fields() {
        let json = serde_json::to_value(ApiResponse::auth_required("https://x.test".into())).unwrap();
        assert_eq!(json["status"], "auth_required");
        assert_eq!(json["redirect_url"], "https://x.test");
        assert!(json.get("data").is_none());
        assert!(json.get("error").is_none());
    }
}
