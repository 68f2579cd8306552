//! Session and invite persistence
//!
//! Only token digests are stored. Expired rows are purged lazily on
//! lookup rather than by a sweeper task.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::{Result, Role};

use super::audit::parse_uuid;

/// Create a session row for a user
pub async fn create_session(
    pool: &SqlitePool,
    token_digest: &str,
    user_id: Uuid,
    expires_at: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO sessions (token_digest, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(token_digest)
        .bind(user_id.to_string())
        .bind(expires_at.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(())
}

/// Resolve a token digest to (user_id, expires_at)
pub async fn find_session(
    pool: &SqlitePool,
    token_digest: &str,
) -> Result<Option<(Uuid, chrono::DateTime<chrono::Utc>)>> {
    let row = sqlx::query("SELECT user_id, expires_at FROM sessions WHERE token_digest = ?")
        .bind(token_digest)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let user_id = parse_uuid(row.get("user_id"))?;
            let expires_at: String = row.get("expires_at");
            let expires_at = chrono::DateTime::parse_from_rfc3339(&expires_at)
                .map_err(|e| yiba_common::Error::Internal(format!("Failed to parse expires_at: {}", e)))?
                .with_timezone(&chrono::Utc);
            Ok(Some((user_id, expires_at)))
        }
        None => Ok(None),
    }
}

/// Delete one session (logout)
pub async fn delete_session(pool: &SqlitePool, token_digest: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token_digest = ?")
        .bind(token_digest)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove sessions past their expiry
pub async fn purge_expired_sessions(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Pending invite row
#[derive(Debug, Clone)]
pub struct Invite {
    pub email: String,
    pub role: Role,
    pub institution_id: Option<Uuid>,
    pub invited_by: Uuid,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub accepted_at: Option<String>,
}

/// Store an invite (digest of the one-time token)
pub async fn create_invite(
    pool: &SqlitePool,
    token_digest: &str,
    invite: &Invite,
    campaign_id: Option<Uuid>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO invites (token_digest, email, role, institution_id, invited_by, campaign_id, expires_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(token_digest)
    .bind(&invite.email)
    .bind(invite.role.as_str())
    .bind(invite.institution_id.map(|id| id.to_string()))
    .bind(invite.invited_by.to_string())
    .bind(campaign_id.map(|id| id.to_string()))
    .bind(invite.expires_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Look up an invite by token digest
pub async fn find_invite(pool: &SqlitePool, token_digest: &str) -> Result<Option<Invite>> {
    let row = sqlx::query(
        "SELECT email, role, institution_id, invited_by, expires_at, accepted_at FROM invites WHERE token_digest = ?",
    )
    .bind(token_digest)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let expires_at: String = row.get("expires_at");
            let expires_at = chrono::DateTime::parse_from_rfc3339(&expires_at)
                .map_err(|e| yiba_common::Error::Internal(format!("Failed to parse expires_at: {}", e)))?
                .with_timezone(&chrono::Utc);
            Ok(Some(Invite {
                email: row.get("email"),
                role: Role::parse(&row.get::<String, _>("role"))?,
                institution_id: row
                    .get::<Option<String>, _>("institution_id")
                    .map(parse_uuid)
                    .transpose()?,
                invited_by: parse_uuid(row.get("invited_by"))?,
                expires_at,
                accepted_at: row.get("accepted_at"),
            }))
        }
        None => Ok(None),
    }
}

/// Mark an invite accepted
pub async fn mark_invite_accepted(pool: &SqlitePool, token_digest: &str) -> Result<()> {
    sqlx::query("UPDATE invites SET accepted_at = ? WHERE token_digest = ?")
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(token_digest)
        .execute(pool)
        .await?;
    Ok(())
}
