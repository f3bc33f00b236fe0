//! OAuth credentials for Google: consent URL, code exchange, and refresh.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use url::Url;

use crate::data::tokens;
use crate::google::errors::GoogleApiError;
use crate::json::decode;
use crate::sync::gate::{AccessChecker, AccessStatus};

pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/calendar.events",
];

/// Refresh this long before the recorded expiry.
const EXPIRY_MARGIN: chrono::Duration = chrono::Duration::seconds(60);

/// How long a consent link stays redeemable.
const STATE_TTL: Duration = Duration::from_secs(60 * 60);

const STATE_LEN: usize = 32;

/// Supplies a bearer token for API calls on behalf of a user.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self, username: &str) -> Result<String, GoogleApiError>;
}

/// The user-facing half of the OAuth flow.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    /// Where to send the user to grant access. Each URL carries a fresh,
    /// single-use `state` bound to `username`.
    async fn consent_url(&self, username: &str) -> anyhow::Result<String>;

    /// The user a callback `state` was issued for, or `None` unless the state
    /// is live and unused.
    async fn claim_state(&self, state: &str) -> anyhow::Result<Option<String>>;

    /// Trade an authorization code for tokens and store them.
    async fn exchange_code(&self, username: &str, code: &str) -> Result<(), GoogleApiError>;

    /// Forget stored credentials.
    async fn revoke(&self, username: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Google OAuth client backed by the `oauth_tokens` table.
pub struct GoogleAuth {
    http: Client,
    pool: PgPool,
    config: OAuthClientConfig,
    auth_url: Url,
}

impl GoogleAuth {
    pub fn new(pool: PgPool, config: OAuthClientConfig, timeout: Duration) -> anyhow::Result<Self> {
        let auth_url = Url::parse(&config.auth_url)
            .with_context(|| format!("Invalid GOOGLE_AUTH_URL '{}'", config.auth_url))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OAuth HTTP client")?;
        Ok(Self {
            http,
            pool,
            config,
            auth_url,
        })
    }

    async fn request_token(
        &self,
        username: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, GoogleApiError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let refused = status == StatusCode::UNAUTHORIZED
                || serde_json::from_str::<TokenErrorResponse>(&body)
                    .is_ok_and(|e| e.error == "invalid_grant");
            if refused {
                let description = serde_json::from_str::<TokenErrorResponse>(&body)
                    .ok()
                    .and_then(|e| e.error_description);
                warn!(username, ?description, "Google refused token grant");
                return Err(GoogleApiError::Unauthorized(username.to_owned()));
            }
            return Err(GoogleApiError::Status {
                status: status.as_u16(),
                url: self.config.token_url.clone(),
                body,
            });
        }

        decode(&body).map_err(|e| GoogleApiError::ParseFailed {
            status: status.as_u16(),
            url: self.config.token_url.clone(),
            source: e.into(),
        })
    }

    async fn store(&self, username: &str, token: &TokenResponse) -> Result<(), GoogleApiError> {
        let expires_at = Utc::now() + chrono::Duration::seconds(token.expires_in);
        tokens::upsert(
            &self.pool,
            username,
            &token.access_token,
            token.refresh_token.as_deref(),
            expires_at,
            token.scope.as_deref(),
        )
        .await
        .context("Failed to store OAuth token")?;
        Ok(())
    }
}

#[async_trait]
impl TokenSource for GoogleAuth {
    async fn access_token(&self, username: &str) -> Result<String, GoogleApiError> {
        let stored = tokens::get(&self.pool, username)
            .await
            .context("Failed to load OAuth token")?
            .ok_or_else(|| GoogleApiError::Unauthorized(username.to_owned()))?;

        if !stored.expires_within(EXPIRY_MARGIN) {
            return Ok(stored.access_token);
        }

        let Some(refresh_token) = stored.refresh_token.as_deref() else {
            return Err(GoogleApiError::Unauthorized(username.to_owned()));
        };
        debug!(username, "Refreshing Google access token");
        let refreshed = self
            .request_token(
                username,
                &[
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ],
            )
            .await?;
        self.store(username, &refreshed).await?;
        Ok(refreshed.access_token)
    }
}

impl GoogleAuth {
    fn authorize_url(&self, state: &str) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("include_granted_scopes", "true")
            .append_pair("state", state);
        url.into()
    }
}

fn new_state() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LEN)
        .map(char::from)
        .collect()
}

#[async_trait]
impl CredentialExchange for GoogleAuth {
    async fn consent_url(&self, username: &str) -> anyhow::Result<String> {
        let state = new_state();
        tokens::issue_state(&self.pool, &state, username, STATE_TTL)
            .await
            .context("Failed to record consent state")?;
        Ok(self.authorize_url(&state))
    }

    async fn claim_state(&self, state: &str) -> anyhow::Result<Option<String>> {
        tokens::claim_state(&self.pool, state, STATE_TTL).await
    }

    async fn exchange_code(&self, username: &str, code: &str) -> Result<(), GoogleApiError> {
        let token = self
            .request_token(
                username,
                &[
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                    ("code", code),
                    ("redirect_uri", self.config.redirect_uri.as_str()),
                    ("grant_type", "authorization_code"),
                ],
            )
            .await?;
        self.store(username, &token).await?;
        info!(username, "Stored Google credentials");
        Ok(())
    }

    async fn revoke(&self, username: &str) -> anyhow::Result<()> {
        tokens::delete(&self.pool, username).await?;
        Ok(())
    }
}

#[async_trait]
impl AccessChecker for GoogleAuth {
    async fn check_access(&self, user_id: &str) -> anyhow::Result<AccessStatus> {
        match self.access_token(user_id).await {
            Ok(_) => Ok(AccessStatus::Granted),
            Err(GoogleApiError::Unauthorized(_)) => Ok(AccessStatus::AuthRequired {
                redirect_url: self.consent_url(user_id).await?,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn credential_rejected(&self, user_id: &str) -> anyhow::Result<String> {
        if tokens::expire(&self.pool, user_id).await? {
            warn!(username = user_id, "Google rejected a stored token before its expiry");
        }
        self.consent_url(user_id).await
    }
}
