use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::data::{DbContext, kv};
use crate::services::Service;
use crate::state::{CycleRecord, KV_LAST_CYCLE, LastCycle, ServiceStatus, ServiceStatusRegistry};
use crate::sync::{PollScheduler, SyncPipeline};
use crate::utils::fmt_duration;

/// Timing knobs for the background poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollTiming {
    /// Wait when there is nobody to sync.
    pub idle_interval: Duration,
    /// Pause between cycles that did work.
    pub interval: Duration,
    pub concurrency: usize,
}

/// Drives [`PollScheduler`] cycles until shutdown.
pub struct PollerService {
    db: DbContext,
    pipeline: Arc<SyncPipeline>,
    timing: PollTiming,
    statuses: ServiceStatusRegistry,
    last_cycle: LastCycle,
}

impl PollerService {
    pub fn new(
        db: DbContext,
        pipeline: Arc<SyncPipeline>,
        timing: PollTiming,
        statuses: ServiceStatusRegistry,
        last_cycle: LastCycle,
    ) -> Self {
        Self {
            db,
            pipeline,
            timing,
            statuses,
            last_cycle,
        }
    }
}

#[async_trait]
impl Service for PollerService {
    fn name(&self) -> &'static str {
        "poller"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let scheduler = PollScheduler::new(
            Arc::new(self.db.clone()),
            self.pipeline.clone(),
            self.timing.idle_interval,
            self.timing.concurrency,
            shutdown.clone(),
        );
        self.statuses.set("poller", ServiceStatus::Active);
        info!(
            interval = fmt_duration(self.timing.interval),
            idle_interval = fmt_duration(self.timing.idle_interval),
            concurrency = self.timing.concurrency,
            "Poller started"
        );

        loop {
            let summary = scheduler.run_cycle().await;
            if summary.cancelled {
                break;
            }
            if summary.idle {
                continue;
            }

            let record = CycleRecord {
                finished_at: Utc::now(),
                summary,
            };
            if let Err(e) = kv::set_json(self.db.pool(), KV_LAST_CYCLE, &record).await {
                warn!(error = ?e, "Failed to persist poll cycle summary");
            }
            self.last_cycle.set(record).await;

            trace!(
                wait = fmt_duration(self.timing.interval),
                "Waiting for next poll cycle"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.timing.interval) => {}
            }
        }

        self.statuses.set("poller", ServiceStatus::Disabled);
        info!("Poller stopped");
        Ok(())
    }
}
