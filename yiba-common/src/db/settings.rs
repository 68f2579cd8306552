//! Settings table access
//!
//! Runtime tunables live in the `settings` key/value table. Readers fall
//! back to a caller-supplied default when a key is missing or unparsable,
//! so a damaged settings row never takes the service down.

use crate::Result;
use sqlx::SqlitePool;
use tracing::warn;

/// Read a string setting
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?
            .flatten();
    Ok(value)
}

/// Read an integer setting with a default
pub async fn get_setting_i64(pool: &SqlitePool, key: &str, default: i64) -> Result<i64> {
    match get_setting(pool, key).await? {
        Some(value) => match value.parse::<i64>() {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                warn!("Setting '{}' has non-integer value '{}', using default {}", key, value, default);
                Ok(default)
            }
        },
        None => Ok(default),
    }
}

/// True when the key exists (regardless of NULL value)
pub async fn setting_exists(pool: &SqlitePool, key: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Write a setting (upsert)
pub async fn put_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// List all settings as (key, value) pairs
pub async fn list_settings(pool: &SqlitePool) -> Result<Vec<(String, Option<String>)>> {
    let rows: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT key, value FROM settings ORDER BY key")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}
