//! Google collaborators: OAuth credentials, Gmail, and Calendar.

pub mod auth;
pub mod calendar;
pub mod errors;
pub mod gmail;

pub use auth::{CredentialExchange, GoogleAuth, TokenSource};
pub use calendar::GoogleCalendar;
pub use errors::GoogleApiError;
pub use gmail::GmailClient;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::json::decode;

/// Send an authorized request and decode a JSON body.
///
/// A 401 means the stored credentials were rejected and maps to
/// [`GoogleApiError::Unauthorized`].
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    username: &str,
) -> Result<T, GoogleApiError> {
    let response = request.send().await?;
    let status = response.status();
    let url = response.url().to_string();

    if status == StatusCode::UNAUTHORIZED {
        return Err(GoogleApiError::Unauthorized(username.to_owned()));
    }
    let body = response.text().await?;
    if !status.is_success() {
        return Err(GoogleApiError::Status {
            status: status.as_u16(),
            url,
            body,
        });
    }

    decode(&body).map_err(|e| GoogleApiError::ParseFailed {
        status: status.as_u16(),
        url,
        source: e.into(),
    })
}

/// Send an authorized request whose response body is ignored.
pub(crate) async fn send_empty(
    request: RequestBuilder,
    username: &str,
) -> Result<(), GoogleApiError> {
    let response = request.send().await?;
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(GoogleApiError::Unauthorized(username.to_owned()));
    }
    // Already-deleted events are fine.
    if status.is_success() || status == StatusCode::GONE || status == StatusCode::NOT_FOUND {
        return Ok(());
    }
    Err(GoogleApiError::Status {
        status: status.as_u16(),
        url: response.url().to_string(),
        body: response.text().await.unwrap_or_default(),
    })
}
