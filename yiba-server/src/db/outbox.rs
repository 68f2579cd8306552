//! Email outbox and campaign persistence
//!
//! Rows are queued by the notifier and campaign endpoints and drained by
//! the dispatch worker in services/campaign.rs.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::{Campaign, OutboxEmail};
use yiba_common::Result;

use super::audit::parse_uuid;

fn email_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<OutboxEmail> {
    Ok(OutboxEmail {
        id: parse_uuid(row.get("id"))?,
        campaign_id: row
            .get::<Option<String>, _>("campaign_id")
            .map(parse_uuid)
            .transpose()?,
        recipient: row.get("recipient"),
        subject: row.get("subject"),
        body: row.get("body"),
        status: row.get("status"),
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
    })
}

/// Queue an email for dispatch
pub async fn queue_email(
    pool: &SqlitePool,
    campaign_id: Option<Uuid>,
    recipient: &str,
    subject: &str,
    body: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO email_outbox (id, campaign_id, recipient, subject, body) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(campaign_id.map(|id| id.to_string()))
    .bind(recipient)
    .bind(subject)
    .bind(body)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Next batch of queued emails, oldest first
pub async fn next_batch(pool: &SqlitePool, batch_size: i64) -> Result<Vec<OutboxEmail>> {
    let rows = sqlx::query(
        "SELECT id, campaign_id, recipient, subject, body, status, attempts, last_error \
         FROM email_outbox WHERE status = 'queued' ORDER BY queued_at LIMIT ?",
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await?;
    rows.iter().map(email_from_row).collect()
}

/// Mark an email sent
pub async fn mark_sent(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE email_outbox SET status = 'sent', attempts = attempts + 1, sent_at = ?, last_error = NULL WHERE id = ?",
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed attempt
///
/// The row stays queued until attempts reach max_attempts, then moves to
/// failed and is no longer picked up.
pub async fn mark_attempt_failed(
    pool: &SqlitePool,
    id: Uuid,
    error: &str,
    max_attempts: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE email_outbox
        SET attempts = attempts + 1,
            last_error = ?,
            status = CASE WHEN attempts + 1 >= ? THEN 'failed' ELSE 'queued' END
        WHERE id = ?
        "#,
    )
    .bind(error)
    .bind(max_attempts)
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

fn campaign_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Campaign> {
    Ok(Campaign {
        id: parse_uuid(row.get("id"))?,
        kind: row.get("kind"),
        institution_id: row
            .get::<Option<String>, _>("institution_id")
            .map(parse_uuid)
            .transpose()?,
        created_by: parse_uuid(row.get("created_by"))?,
        status: row.get("status"),
        total: row.get("total"),
        sent: row.get("sent"),
    })
}

/// Create a campaign row
pub async fn create_campaign(
    pool: &SqlitePool,
    kind: &str,
    institution_id: Option<Uuid>,
    created_by: Uuid,
    total: i64,
) -> Result<Campaign> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO campaigns (id, kind, institution_id, created_by, total) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(kind)
    .bind(institution_id.map(|id| id.to_string()))
    .bind(created_by.to_string())
    .bind(total)
    .execute(pool)
    .await?;

    find_campaign(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::Internal("Campaign vanished after create".to_string()))
}

pub async fn find_campaign(pool: &SqlitePool, id: Uuid) -> Result<Option<Campaign>> {
    let row = sqlx::query(
        "SELECT id, kind, institution_id, created_by, status, total, sent FROM campaigns WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(campaign_from_row).transpose()
}

/// Refresh a campaign's sent counter and status from its outbox rows
pub async fn refresh_campaign_progress(pool: &SqlitePool, id: Uuid) -> Result<Campaign> {
    sqlx::query(
        r#"
        UPDATE campaigns
        SET sent = (SELECT COUNT(*) FROM email_outbox WHERE campaign_id = campaigns.id AND status = 'sent'),
            status = CASE
                WHEN (SELECT COUNT(*) FROM email_outbox WHERE campaign_id = campaigns.id AND status = 'queued') = 0
                THEN 'complete' ELSE 'running'
            END,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .execute(pool)
    .await?;

    find_campaign(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::NotFound(format!("Campaign {}", id)))
}
