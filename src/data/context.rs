//! Pool wrapper that plugs the database into the sync seams.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::data::models::{User, UserProfile};
use crate::data::{timetable, users};
use crate::sync::extract::{ExtractedSchedule, ScheduleEvent};
use crate::sync::store::{ReplaceCounts, TimetableStore, UserDirectory};

#[derive(Clone)]
pub struct DbContext {
    pool: PgPool,
}

impl DbContext {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TimetableStore for DbContext {
    async fn delete_all(&self, user_id: &str) -> anyhow::Result<u64> {
        timetable::delete_all(&self.pool, user_id).await
    }

    async fn write_all(&self, user_id: &str, schedule: &ExtractedSchedule) -> anyhow::Result<u64> {
        timetable::insert_all(&self.pool, user_id, schedule).await
    }

    async fn replace(
        &self,
        user_id: &str,
        schedule: &ExtractedSchedule,
    ) -> anyhow::Result<ReplaceCounts> {
        timetable::replace(&self.pool, user_id, schedule).await
    }

    async fn list(&self, user_id: &str) -> anyhow::Result<Vec<ScheduleEvent>> {
        timetable::list(&self.pool, user_id).await
    }
}

#[async_trait]
impl UserDirectory for DbContext {
    async fn upsert(&self, profile: &UserProfile) -> anyhow::Result<User> {
        users::upsert(&self.pool, profile).await
    }

    async fn find(&self, username: &str) -> anyhow::Result<Option<User>> {
        users::find(&self.pool, username).await
    }

    async fn list_active(&self) -> anyhow::Result<Vec<User>> {
        users::list_active(&self.pool).await
    }

    async fn deactivate(&self, username: &str) -> anyhow::Result<bool> {
        users::deactivate(&self.pool, username).await
    }
}
