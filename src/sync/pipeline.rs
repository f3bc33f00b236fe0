//! Per-user sync: gate → mail → cache or download → extract → replace.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::data::models::User;
use crate::sync::UserInfo;
use crate::sync::cache::{AttachmentResolver, ScheduleCache};
use crate::sync::extract::{DocumentParser, ScheduleExtractor};
use crate::sync::gate::{AccessChecker, ServiceGate};
use crate::sync::mail::{MailFetcher, MailSource};
use crate::sync::outcome::{StepOutcome, SyncError, step};
use crate::sync::store::{CalendarSink, TimetableStore, TimetableWriter};
use crate::utils::{fmt_duration, log_if_slow};

const SLOW_SYNC_THRESHOLD: Duration = Duration::from_secs(60);

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub access: Arc<dyn AccessChecker>,
    pub mail: Arc<dyn MailSource>,
    pub parser: Arc<dyn DocumentParser>,
    pub store: Arc<dyn TimetableStore>,
    pub calendar: Arc<dyn CalendarSink>,
}

/// Where the extracted document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSource {
    Cache,
    Download,
}

/// Result of a successful sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub username: String,
    pub message_id: String,
    pub filename: String,
    pub source: ScheduleSource,
    pub events: usize,
    pub removed: u64,
    pub inserted: u64,
}

/// Progress of one user through a sync pass. Nothing is retried within a
/// pass; the last stage reached is reported when a pass stops early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncStage {
    Start,
    AuthChecked,
    MailFetched,
    CacheHit,
    Downloaded,
    Extracted,
}

pub struct SyncPipeline {
    gate: ServiceGate,
    mail: MailFetcher,
    cache: ScheduleCache,
    resolver: AttachmentResolver,
    extractor: ScheduleExtractor,
    writer: TimetableWriter,
}

impl SyncPipeline {
    pub fn new(settings: &SyncSettings, collaborators: Collaborators) -> Self {
        let cache = ScheduleCache::new(settings.attachment_dir.clone(), settings.cache_policy);
        Self {
            gate: ServiceGate::new(collaborators.access, settings.request_timeout),
            mail: MailFetcher::new(
                collaborators.mail.clone(),
                settings.max_results,
                settings.request_timeout,
            ),
            resolver: AttachmentResolver::new(
                collaborators.mail,
                cache.clone(),
                settings.request_timeout,
            ),
            cache,
            extractor: ScheduleExtractor::new(collaborators.parser, settings.extract_timeout),
            writer: TimetableWriter::new(
                collaborators.store,
                collaborators.calendar,
                settings.request_timeout,
                settings.calendar_timeout,
            ),
        }
    }

    pub fn gate(&self) -> &ServiceGate {
        &self.gate
    }

    pub fn writer(&self) -> &TimetableWriter {
        &self.writer
    }

    /// Run the full pipeline for one user.
    ///
    /// Returns `NotFound` when the mailbox holds no timetable attachment, in
    /// which case the stored timetable is left as it was.
    #[tracing::instrument(skip_all, fields(username = %user.username))]
    pub async fn sync_user(&self, user: &User) -> StepOutcome<SyncReport> {
        let start = Instant::now();
        let mut stage = SyncStage::Start;
        let outcome = match self.run_stages(user, &mut stage).await {
            StepOutcome::Error(SyncError::CredentialRejected { step }) => {
                debug!(?stage, step, "Credential refused mid-sync");
                self.gate.reauthorize(&user.username).await
            }
            other => other,
        };
        let duration = start.elapsed();

        match &outcome {
            StepOutcome::Success(report) => info!(
                events = report.events,
                removed = report.removed,
                source = ?report.source,
                filename = %report.filename,
                duration = fmt_duration(duration),
                "Timetable synced"
            ),
            StepOutcome::AuthRequired { .. } => {
                info!("Skipping sync, user must re-authorize")
            }
            StepOutcome::NotFound => debug!(?stage, "No timetable mail found"),
            StepOutcome::Error(e) => warn!(
                ?stage,
                kind = e.kind(),
                error = ?e,
                duration = fmt_duration(duration),
                "Sync failed"
            ),
        }
        log_if_slow(start, SLOW_SYNC_THRESHOLD, "sync_user", &user.username);

        outcome
    }

    async fn run_stages(&self, user: &User, stage: &mut SyncStage) -> StepOutcome<SyncReport> {
        let username = user.username.as_str();

        step!(self.gate.check(username).await);
        *stage = SyncStage::AuthChecked;

        let messages = step!(self.mail.fetch_recent(username).await);
        *stage = SyncStage::MailFetched;
        let Some(attachment) = messages.latest_attachment() else {
            return StepOutcome::NotFound;
        };
        let info = UserInfo::new(user.clone(), attachment);

        let (path, source): (PathBuf, ScheduleSource) = match self.cache.get_schedule(&info).await
        {
            StepOutcome::Success(path) => {
                *stage = SyncStage::CacheHit;
                (path, ScheduleSource::Cache)
            }
            StepOutcome::NotFound => {
                let path = step!(
                    self.resolver
                        .fetch(
                            username,
                            &info.attachment.message_id,
                            &info.attachment.attachment_id,
                            &info,
                        )
                        .await
                );
                *stage = SyncStage::Downloaded;
                (path, ScheduleSource::Download)
            }
            StepOutcome::AuthRequired { redirect_url } => {
                return StepOutcome::AuthRequired { redirect_url };
            }
            StepOutcome::Error(e) => return StepOutcome::Error(e),
        };

        let schedule = step!(self.extractor.extract(&path, &info).await);
        *stage = SyncStage::Extracted;

        let counts = step!(self.writer.replace(username, &schedule).await);

        StepOutcome::Success(SyncReport {
            username: username.to_owned(),
            message_id: info.attachment.message_id.clone(),
            filename: info.original_filename().to_owned(),
            source,
            events: schedule.len(),
            removed: counts.removed,
            inserted: counts.inserted,
        })
    }
}
