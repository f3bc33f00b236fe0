//! Database operations for the `oauth_tokens` and `oauth_states` tables.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::models::OAuthToken;

pub async fn get(pool: &PgPool, username: &str) -> Result<Option<OAuthToken>> {
    let token = sqlx::query_as::<_, OAuthToken>("SELECT * FROM oauth_tokens WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(token)
}

/// Store a fresh grant. A missing refresh token keeps the previous one, since
/// Google only issues it on first consent.
pub async fn upsert(
    pool: &PgPool,
    username: &str,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
    scope: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO oauth_tokens (username, access_token, refresh_token, expires_at, scope)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (username) DO UPDATE SET
            access_token = EXCLUDED.access_token,
            refresh_token = COALESCE(EXCLUDED.refresh_token, oauth_tokens.refresh_token),
            expires_at = EXCLUDED.expires_at,
            scope = COALESCE(EXCLUDED.scope, oauth_tokens.scope),
            updated_at = now()
        "#,
    )
    .bind(username)
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .bind(scope)
    .execute(pool)
    .await?;
    Ok(())
}

/// Forget a user's credentials, forcing a new consent.
pub async fn delete(pool: &PgPool, username: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM oauth_tokens WHERE username = $1")
        .bind(username)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Make the stored access token count as expired so the next use refreshes
/// it. Returns false when the user has no stored token.
pub async fn expire(pool: &PgPool, username: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE oauth_tokens SET expires_at = to_timestamp(0), updated_at = now() WHERE username = $1",
    )
    .bind(username)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Remember a consent `state` issued for `username`, dropping any issued
/// longer than `max_age` ago.
pub async fn issue_state(pool: &PgPool, state: &str, username: &str, max_age: Duration) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM oauth_states WHERE created_at < now() - make_interval(secs => $1)")
        .bind(max_age.as_secs_f64())
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO oauth_states (state, username) VALUES ($1, $2)")
        .bind(state)
        .bind(username)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Consume a consent `state`, returning the user it was issued for. Each state
/// can be claimed once, and only within `max_age` of being issued.
pub async fn claim_state(pool: &PgPool, state: &str, max_age: Duration) -> Result<Option<String>> {
    let username = sqlx::query_scalar::<_, String>(
        r#"
        DELETE FROM oauth_states
        WHERE state = $1 AND created_at >= now() - make_interval(secs => $2)
        RETURNING username
        "#,
    )
    .bind(state)
    .bind(max_age.as_secs_f64())
    .fetch_optional(pool)
    .await?;
    Ok(username)
}
