//! Error types for the Google API clients.

use crate::sync::gate::CredentialRejected;

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    /// No usable credentials: never granted, revoked, or refresh refused.
    #[error("Google credentials for {0} are missing or no longer valid")]
    Unauthorized(String),
    #[error("Google API returned {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("Failed to parse response")]
    ParseFailed {
        status: u16,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    RequestFailed(#[from] anyhow::Error),
}

impl From<reqwest::Error> for GoogleApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::RequestFailed(err.into())
    }
}

impl GoogleApiError {
    /// Hand the error to the sync layer, where a refused credential means
    /// "ask the user to consent again" rather than a transport fault.
    pub(crate) fn into_sync(self) -> anyhow::Error {
        match self {
            GoogleApiError::Unauthorized(user_id) => CredentialRejected { user_id }.into(),
            other => other.into(),
        }
    }
}
