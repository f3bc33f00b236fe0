//! Small JSON documents that should outlive a restart.
//!
//! Backed by the UNLOGGED `app_kv` table: kept across clean restarts, allowed
//! to vanish after a database crash. The poller stores its last cycle here.

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use tracing::warn;

async fn get(pool: &PgPool, key: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT value FROM app_kv WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
}

async fn set(pool: &PgPool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO app_kv (key, value) VALUES ($1, $2)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// The document stored under `key`. A value written by an older, incompatible
/// build reads as absent.
pub async fn get_json<T: DeserializeOwned>(pool: &PgPool, key: &str) -> anyhow::Result<Option<T>> {
    let Some(raw) = get(pool, key).await? else {
        return Ok(None);
    };
    match crate::json::decode::<T>(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key, error = %e, "Discarding undecodable stored value");
            Ok(None)
        }
    }
}

pub async fn set_json<T: Serialize>(pool: &PgPool, key: &str, value: &T) -> anyhow::Result<()> {
    set(pool, key, &serde_json::to_string(value)?).await?;
    Ok(())
}
