//! Database operations for the `users` table.

use anyhow::Result;
use sqlx::PgPool;

use crate::data::models::{User, UserProfile};

/// Insert a user, or refresh an existing one and mark it active again.
///
/// Profile fields left as `None` keep their stored value.
pub async fn upsert(pool: &PgPool, profile: &UserProfile) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, department, year, division)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (username) DO UPDATE SET
            department = COALESCE(EXCLUDED.department, users.department),
            year = COALESCE(EXCLUDED.year, users.year),
            division = COALESCE(EXCLUDED.division, users.division),
            active = TRUE,
            updated_at = now()
        RETURNING *
        "#,
    )
    .bind(&profile.username)
    .bind(&profile.department)
    .bind(&profile.year)
    .bind(&profile.division)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

pub async fn find(pool: &PgPool, username: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Active users in registration order.
pub async fn list_active(pool: &PgPool) -> Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users WHERE active ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(users)
}

/// Mark a user inactive so the poller skips them. Returns false if unknown.
pub async fn deactivate(pool: &PgPool, username: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE users SET active = FALSE, updated_at = now() WHERE username = $1",
    )
    .bind(username)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
