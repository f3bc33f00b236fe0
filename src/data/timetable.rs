//! Database operations for the `timetable_entries` table.

use anyhow::{Context, Result};
use chrono::{NaiveTime, Weekday};
use sqlx::{PgPool, Postgres, Transaction};

use crate::data::models::TimetableEntry;
use crate::sync::extract::{ExtractedSchedule, ScheduleEvent};
use crate::sync::store::ReplaceCounts;

/// Swap a user's whole timetable for `schedule` in one transaction.
///
/// Concurrent replaces for the same user run one after the other, so the last
/// commit wins and the rows of the other never survive alongside it.
pub async fn replace(
    pool: &PgPool,
    username: &str,
    schedule: &ExtractedSchedule,
) -> Result<ReplaceCounts> {
    let mut tx = pool.begin().await?;
    lock_user(&mut tx, username).await?;

    let removed = delete_in(&mut tx, username).await?;
    let inserted = insert_in(&mut tx, username, schedule.events()).await?;

    tx.commit().await?;
    Ok(ReplaceCounts { removed, inserted })
}

/// Remove every entry for a user.
pub async fn delete_all(pool: &PgPool, username: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;
    lock_user(&mut tx, username).await?;
    let removed = delete_in(&mut tx, username).await?;
    tx.commit().await?;
    Ok(removed)
}

/// Append entries without touching the existing ones.
pub async fn insert_all(pool: &PgPool, username: &str, schedule: &ExtractedSchedule) -> Result<u64> {
    let mut tx = pool.begin().await?;
    lock_user(&mut tx, username).await?;
    let inserted = insert_in(&mut tx, username, schedule.events()).await?;
    tx.commit().await?;
    Ok(inserted)
}

/// Stored entries for a user, ordered by day then start time.
pub async fn list(pool: &PgPool, username: &str) -> Result<Vec<ScheduleEvent>> {
    let rows = sqlx::query_as::<_, TimetableEntry>(
        r#"
        SELECT * FROM timetable_entries
        WHERE username = $1
        ORDER BY day, start_time, end_time, subject
        "#,
    )
    .bind(username)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Serialize writers of one user's timetable until the transaction ends.
async fn lock_user(tx: &mut Transaction<'_, Postgres>, username: &str) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(username)
        .execute(&mut **tx)
        .await
        .context("Failed to lock timetable")?;
    Ok(())
}

async fn delete_in(tx: &mut Transaction<'_, Postgres>, username: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM timetable_entries WHERE username = $1")
        .bind(username)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

async fn insert_in(
    tx: &mut Transaction<'_, Postgres>,
    username: &str,
    events: &[ScheduleEvent],
) -> Result<u64> {
    if events.is_empty() {
        return Ok(0);
    }

    let usernames: Vec<&str> = events.iter().map(|_| username).collect();
    let days: Vec<i16> = events
        .iter()
        .map(|e| e.day.num_days_from_monday() as i16)
        .collect();
    let starts: Vec<NaiveTime> = events.iter().map(|e| e.start_time).collect();
    let ends: Vec<NaiveTime> = events.iter().map(|e| e.end_time).collect();
    let subjects: Vec<&str> = events.iter().map(|e| e.subject.as_str()).collect();
    let locations: Vec<Option<&str>> = events.iter().map(|e| e.location.as_deref()).collect();

    let result = sqlx::query(
        r#"
        INSERT INTO timetable_entries (username, day, start_time, end_time, subject, location)
        SELECT * FROM UNNEST($1::text[], $2::smallint[], $3::time[], $4::time[], $5::text[], $6::text[])
        "#,
    )
    .bind(&usernames)
    .bind(&days)
    .bind(&starts)
    .bind(&ends)
    .bind(&subjects)
    .bind(&locations)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

impl TryFrom<TimetableEntry> for ScheduleEvent {
    type Error = anyhow::Error;

    fn try_from(row: TimetableEntry) -> Result<Self> {
        let day = u8::try_from(row.day)
            .ok()
            .and_then(|d| Weekday::try_from(d).ok())
            .with_context(|| format!("Invalid stored day {} for entry {}", row.day, row.id))?;
        Ok(ScheduleEvent {
            day,
            start_time: row.start_time,
            end_time: row.end_time,
            subject: row.subject,
            location: row.location,
        })
    }
}
