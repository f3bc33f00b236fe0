//! Database liveness check.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sqlx::PgPool;

/// Round-trip a trivial query and report how long it took.
pub async fn ping(pool: &PgPool) -> Result<Duration> {
    let start = Instant::now();
    let one: i32 = sqlx::query_scalar("SELECT 1")
        .fetch_one(pool)
        .await
        .context("ping query failed")?;
    anyhow::ensure!(one == 1, "ping returned {one}");
    Ok(start.elapsed())
}
