//! Persistence and calendar seams, and the replace-on-sync write path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::data::models::{User, UserProfile};
use crate::sync::extract::{ExtractedSchedule, ScheduleEvent};
use crate::sync::outcome::{StepOutcome, SyncError, call_with_timeout};

/// Row counts from one replace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceCounts {
    pub removed: u64,
    pub inserted: u64,
}

/// Result of clearing a user's timetable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub removed: u64,
    pub calendar_cleared: bool,
}

/// Per-user timetable persistence.
#[async_trait]
pub trait TimetableStore: Send + Sync {
    /// Remove every entry owned by `user_id`, returning how many were removed.
    async fn delete_all(&self, user_id: &str) -> anyhow::Result<u64>;

    /// Insert `schedule` for `user_id` without touching existing entries.
    async fn write_all(&self, user_id: &str, schedule: &ExtractedSchedule) -> anyhow::Result<u64>;

    /// `delete_all` followed by `write_all` as a single unit: either the old
    /// set or the new set is visible, never a mix and never neither.
    async fn replace(
        &self,
        user_id: &str,
        schedule: &ExtractedSchedule,
    ) -> anyhow::Result<ReplaceCounts>;

    /// Current entries for `user_id`, ordered by day and start time.
    async fn list(&self, user_id: &str) -> anyhow::Result<Vec<ScheduleEvent>>;
}

/// User records, keyed by username.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Insert or update by username; the user is (re)activated.
    async fn upsert(&self, profile: &UserProfile) -> anyhow::Result<User>;

    async fn find(&self, username: &str) -> anyhow::Result<Option<User>>;

    async fn list_active(&self) -> anyhow::Result<Vec<User>>;

    /// Returns false when no such user exists.
    async fn deactivate(&self, username: &str) -> anyhow::Result<bool>;
}

/// External calendar that mirrors the stored timetable.
#[async_trait]
pub trait CalendarSink: Send + Sync {
    /// Make the calendar hold exactly `events` for this user. Calling it twice
    /// with the same events leaves the same calendar.
    async fn replace_events(&self, user_id: &str, events: &[ScheduleEvent]) -> anyhow::Result<()>;
}

/// Applies an extracted schedule to the store, then mirrors it to the calendar.
pub struct TimetableWriter {
    store: Arc<dyn TimetableStore>,
    calendar: Arc<dyn CalendarSink>,
    timeout: Duration,
    calendar_timeout: Duration,
    /// Events last mirrored to each user's calendar by this process.
    mirrored: DashMap<String, Vec<ScheduleEvent>>,
}

impl TimetableWriter {
    pub fn new(
        store: Arc<dyn TimetableStore>,
        calendar: Arc<dyn CalendarSink>,
        timeout: Duration,
        calendar_timeout: Duration,
    ) -> Self {
        Self {
            store,
            calendar,
            timeout,
            calendar_timeout,
            mirrored: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TimetableStore> {
        &self.store
    }

    /// Replace the stored timetable and push it to the calendar.
    ///
    /// The calendar push is skipped when it already holds exactly these
    /// events. A calendar failure is reported after the store has committed;
    /// the next cycle repeats the idempotent calendar replace.
    pub async fn replace(
        &self,
        user_id: &str,
        schedule: &ExtractedSchedule,
    ) -> StepOutcome<ReplaceCounts> {
        let counts = match tokio::time::timeout(self.timeout, self.store.replace(user_id, schedule))
            .await
        {
            Ok(Ok(counts)) => counts,
            Ok(Err(e)) => return StepOutcome::Error(SyncError::persistence("timetable_replace", e)),
            Err(_elapsed) => {
                return StepOutcome::Error(SyncError::Timeout {
                    step: "timetable_replace",
                    after: self.timeout,
                });
            }
        };
        debug!(
            username = user_id,
            removed = counts.removed,
            inserted = counts.inserted,
            "Timetable replaced"
        );

        let unchanged = self
            .mirrored
            .get(user_id)
            .is_some_and(|events| events.as_slice() == schedule.events());
        if unchanged {
            debug!(username = user_id, "Calendar already up to date");
            return StepOutcome::Success(counts);
        }

        if let Err(e) = self.mirror(user_id, schedule.events(), "calendar_sync").await {
            warn!(username = user_id, error = ?e, "Calendar sync failed after timetable commit");
            return StepOutcome::Error(e);
        }

        StepOutcome::Success(counts)
    }

    /// Remove the user's timetable from the store, then from the calendar.
    ///
    /// Only the store delete decides the outcome. A calendar that cannot be
    /// reached is logged and reported in [`ClearReport::calendar_cleared`].
    pub async fn clear(&self, user_id: &str) -> StepOutcome<ClearReport> {
        let removed = match tokio::time::timeout(self.timeout, self.store.delete_all(user_id)).await
        {
            Ok(Ok(removed)) => removed,
            Ok(Err(e)) => return StepOutcome::Error(SyncError::persistence("timetable_delete", e)),
            Err(_elapsed) => {
                return StepOutcome::Error(SyncError::Timeout {
                    step: "timetable_delete",
                    after: self.timeout,
                });
            }
        };

        let calendar_cleared = match self.mirror(user_id, &[], "calendar_clear").await {
            Ok(()) => true,
            Err(e) => {
                warn!(username = user_id, error = ?e, "Could not clear calendar events");
                false
            }
        };

        StepOutcome::Success(ClearReport {
            removed,
            calendar_cleared,
        })
    }

    /// Push `events` to the calendar under the calendar budget, remembering
    /// them only once the push has fully succeeded.
    async fn mirror(
        &self,
        user_id: &str,
        events: &[ScheduleEvent],
        step: &'static str,
    ) -> Result<(), SyncError> {
        self.mirrored.remove(user_id);
        call_with_timeout(
            step,
            self.calendar_timeout,
            self.calendar.replace_events(user_id, events),
        )
        .await?;
        self.mirrored.insert(user_id.to_owned(), events.to_vec());
        Ok(())
    }
}
