//! Decides whether the pipeline may proceed for a user.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::sync::outcome::{StepOutcome, call_with_timeout};

/// Returned by mail and calendar backends when the provider refuses a
/// credential that the gate had accepted, e.g. one revoked before its
/// recorded expiry.
#[derive(Debug, thiserror::Error)]
#[error("provider rejected the stored credential for {user_id}")]
pub struct CredentialRejected {
    pub user_id: String,
}

/// What the credential backend knows about a user's access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessStatus {
    Granted,
    /// No usable credential; the user must visit `redirect_url` to consent.
    AuthRequired { redirect_url: String },
}

/// Credential and reachability check against the mail/calendar provider.
///
/// "No credential" is a normal answer (`AuthRequired`), not an error; only
/// transport faults should be returned as `Err`.
#[async_trait]
pub trait AccessChecker: Send + Sync {
    async fn check_access(&self, user_id: &str) -> anyhow::Result<AccessStatus>;

    /// The provider refused a credential this checker granted. Invalidate it
    /// so the next check re-validates, and return where the user can consent
    /// again.
    async fn credential_rejected(&self, user_id: &str) -> anyhow::Result<String>;
}

pub struct ServiceGate {
    checker: Arc<dyn AccessChecker>,
    timeout: Duration,
}

impl ServiceGate {
    pub fn new(checker: Arc<dyn AccessChecker>, timeout: Duration) -> Self {
        Self { checker, timeout }
    }

    pub async fn check(&self, user_id: &str) -> StepOutcome<()> {
        let status = match call_with_timeout(
            "auth_check",
            self.timeout,
            self.checker.check_access(user_id),
        )
        .await
        {
            Ok(status) => status,
            Err(e) => return StepOutcome::Error(e),
        };

        match status {
            AccessStatus::Granted => StepOutcome::Success(()),
            AccessStatus::AuthRequired { redirect_url } => {
                debug!(username = user_id, "Credential missing or expired");
                StepOutcome::AuthRequired { redirect_url }
            }
        }
    }

    /// Turn a credential rejection seen mid-pipeline into `AuthRequired`.
    pub async fn reauthorize<T>(&self, user_id: &str) -> StepOutcome<T> {
        match call_with_timeout(
            "auth_reset",
            self.timeout,
            self.checker.credential_rejected(user_id),
        )
        .await
        {
            Ok(redirect_url) => {
                info!(username = user_id, "Provider rejected credential, consent needed");
                StepOutcome::AuthRequired { redirect_url }
            }
            Err(e) => StepOutcome::Error(e),
        }
    }
}
