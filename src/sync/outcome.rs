//! The tagged result every sync stage returns.
//!
//! A stage never lets a fault cross into the next stage: it reports exactly
//! one [`OutcomeKind`], and only `Success` carries a payload.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::sync::extract::ExtractionFailure;
use crate::sync::gate::CredentialRejected;
use crate::utils::fmt_duration;

/// Outcome of one pipeline stage (or of the whole pipeline).
#[derive(Debug)]
pub enum StepOutcome<T> {
    Success(T),
    /// The stored credential is missing, expired, or revoked.
    AuthRequired { redirect_url: String },
    /// Nothing to work with this cycle (no mail, no cached file). Not a fault.
    NotFound,
    Error(SyncError),
}

/// The closed set of outcome kinds, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    AuthRequired,
    NotFound,
    Error,
}

impl<T> StepOutcome<T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            StepOutcome::Success(_) => OutcomeKind::Success,
            StepOutcome::AuthRequired { .. } => OutcomeKind::AuthRequired,
            StepOutcome::NotFound => OutcomeKind::NotFound,
            StepOutcome::Error(_) => OutcomeKind::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success(_))
    }

    /// The payload, if this is a success.
    pub fn success(self) -> Option<T> {
        match self {
            StepOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StepOutcome<U> {
        match self {
            StepOutcome::Success(value) => StepOutcome::Success(f(value)),
            StepOutcome::AuthRequired { redirect_url } => {
                StepOutcome::AuthRequired { redirect_url }
            }
            StepOutcome::NotFound => StepOutcome::NotFound,
            StepOutcome::Error(e) => StepOutcome::Error(e),
        }
    }
}

impl<T> From<SyncError> for StepOutcome<T> {
    fn from(e: SyncError) -> Self {
        StepOutcome::Error(e)
    }
}

/// Unwraps a `Success` payload or returns the non-success outcome from the
/// enclosing function, re-typed to its return type.
macro_rules! step {
    ($outcome:expr) => {
        match $outcome {
            $crate::sync::StepOutcome::Success(value) => value,
            $crate::sync::StepOutcome::AuthRequired { redirect_url } => {
                return $crate::sync::StepOutcome::AuthRequired { redirect_url };
            }
            $crate::sync::StepOutcome::NotFound => return $crate::sync::StepOutcome::NotFound,
            $crate::sync::StepOutcome::Error(e) => return $crate::sync::StepOutcome::Error(e),
        }
    };
}
pub(crate) use step;

/// Failures carried by [`StepOutcome::Error`].
///
/// `AuthRequired` and `NoDataFound` are outcome kinds of their own and never
/// appear here.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),
    #[error("collaborator call failed during {step}")]
    Transport {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("{step} timed out after {}", fmt_duration(*.after))]
    Timeout { step: &'static str, after: Duration },
    #[error("failed to persist during {step}")]
    Persistence {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("sync task aborted: {0}")]
    Aborted(String),
    /// The provider refused the credential during `step`. The pipeline turns
    /// this into `AuthRequired` before reporting.
    #[error("credential rejected during {step}")]
    CredentialRejected { step: &'static str },
}

impl SyncError {
    pub fn transport(step: &'static str, source: impl Into<anyhow::Error>) -> Self {
        SyncError::Transport {
            step,
            source: source.into(),
        }
    }

    pub fn persistence(step: &'static str, source: impl Into<anyhow::Error>) -> Self {
        SyncError::Persistence {
            step,
            source: source.into(),
        }
    }

    /// Stable failure-kind name used in logs and API responses.
    ///
    /// A timeout is a transport failure.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Extraction(_) => "extraction_failure",
            SyncError::Transport { .. } | SyncError::Timeout { .. } => "transport_error",
            SyncError::Persistence { .. } => "persistence_failure",
            SyncError::Aborted(_) => "aborted",
            SyncError::CredentialRejected { .. } => "credential_rejected",
        }
    }
}

/// Run one collaborator call under `limit`, classifying a transport fault, a
/// refused credential, or an elapsed timer as the matching [`SyncError`].
pub(crate) async fn call_with_timeout<T, F>(
    step: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, SyncError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.chain().any(|cause| cause.is::<CredentialRejected>()) => {
            Err(SyncError::CredentialRejected { step })
        }
        Ok(Err(e)) => Err(SyncError::transport(step, e)),
        Err(_elapsed) => Err(SyncError::Timeout { step, after: limit }),
    }
}
