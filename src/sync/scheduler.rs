//! Background poll cycle over all active users.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

use crate::sync::outcome::OutcomeKind;
use crate::sync::pipeline::SyncPipeline;
use crate::sync::store::UserDirectory;
use crate::utils::fmt_duration;

/// Tally of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub attempted: usize,
    pub synced: usize,
    /// Users with no timetable mail this cycle.
    pub skipped: usize,
    pub auth_required: usize,
    pub failed: usize,
    /// The cycle found nobody to process and waited out the idle interval.
    pub idle: bool,
    /// Shutdown was requested before or during the cycle's idle wait.
    pub cancelled: bool,
}

impl CycleSummary {
    fn record(&mut self, kind: OutcomeKind) {
        self.attempted += 1;
        match kind {
            OutcomeKind::Success => self.synced += 1,
            OutcomeKind::NotFound => self.skipped += 1,
            OutcomeKind::AuthRequired => self.auth_required += 1,
            OutcomeKind::Error => self.failed += 1,
        }
    }
}

pub struct PollScheduler {
    users: Arc<dyn UserDirectory>,
    pipeline: Arc<SyncPipeline>,
    idle_interval: Duration,
    concurrency: usize,
    shutdown: CancellationToken,
}

impl PollScheduler {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        pipeline: Arc<SyncPipeline>,
        idle_interval: Duration,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            users,
            pipeline,
            idle_interval,
            concurrency: concurrency.max(1),
            shutdown,
        }
    }

    /// One pass over every user that is active when the cycle starts.
    ///
    /// Each user is attempted exactly once and in isolation: a failure, or even
    /// a panic, in one user's sync never affects the others. At most
    /// `concurrency` users are in flight at a time. Shutdown is only observed
    /// before work starts and during the idle wait; users already in flight run
    /// to completion.
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();
        if self.shutdown.is_cancelled() {
            summary.cancelled = true;
            return summary;
        }

        let users = match self.users.list_active().await {
            Ok(users) => users,
            Err(e) => {
                error!(error = ?e, "Failed to load active users");
                summary.idle = true;
                summary.cancelled = self.idle_wait().await;
                return summary;
            }
        };

        if users.is_empty() {
            trace!(
                idle = fmt_duration(self.idle_interval),
                "No active users, waiting"
            );
            summary.idle = true;
            summary.cancelled = self.idle_wait().await;
            return summary;
        }

        let start = Instant::now();
        info!(
            users = users.len(),
            concurrency = self.concurrency,
            "Starting poll cycle"
        );

        let kinds: Vec<OutcomeKind> = futures::stream::iter(users)
            .map(|user| {
                let pipeline = self.pipeline.clone();
                async move {
                    let username = user.username.clone();
                    let task = tokio::spawn(async move { pipeline.sync_user(&user).await.kind() });
                    match task.await {
                        Ok(kind) => kind,
                        Err(e) => {
                            error!(username, error = ?e, "Sync task panicked");
                            OutcomeKind::Error
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for kind in kinds {
            summary.record(kind);
        }

        info!(
            attempted = summary.attempted,
            synced = summary.synced,
            skipped = summary.skipped,
            auth_required = summary.auth_required,
            failed = summary.failed,
            duration = fmt_duration(start.elapsed()),
            "Poll cycle complete"
        );
        summary
    }

    /// Sleep for the idle interval; returns true if shutdown cut it short.
    async fn idle_wait(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = time::sleep(self.idle_interval) => false,
        }
    }
}
