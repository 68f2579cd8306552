//! In-app notification operations

use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::Notification;
use yiba_common::Result;

use super::audit::parse_uuid;
use crate::pagination::{calculate_pagination, PAGE_SIZE};

fn notification_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Notification> {
    Ok(Notification {
        id: parse_uuid(row.get("id"))?,
        user_id: parse_uuid(row.get("user_id"))?,
        kind: row.get("kind"),
        title: row.get("title"),
        body: row.get("body"),
        read: row.get::<i64, _>("read") != 0,
        created_at: row.get("created_at"),
    })
}

/// Insert a notification for one user
pub async fn insert(
    pool: &SqlitePool,
    user_id: Uuid,
    kind: &str,
    title: &str,
    body: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO notifications (id, user_id, kind, title, body) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(kind)
    .bind(title)
    .bind(body)
    .execute(pool)
    .await?;
    Ok(id)
}

/// List a user's notifications, newest first, paginated
pub async fn list(
    pool: &SqlitePool,
    user_id: Uuid,
    unread_only: bool,
    page: i64,
) -> Result<(Vec<Notification>, i64, i64)> {
    let mut where_sql = " WHERE user_id = ?".to_string();
    if unread_only {
        where_sql.push_str(" AND read = 0");
    }

    let count_sql = format!("SELECT COUNT(*) FROM notifications{}", where_sql);
    let total: i64 = sqlx::query_scalar(&count_sql)
        .bind(user_id.to_string())
        .fetch_one(pool)
        .await?;

    let pagination = calculate_pagination(total, page);
    let rows_sql = format!(
        "SELECT id, user_id, kind, title, body, read, created_at FROM notifications{} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
        where_sql, PAGE_SIZE, pagination.offset
    );
    let rows = sqlx::query(&rows_sql)
        .bind(user_id.to_string())
        .fetch_all(pool)
        .await?;

    let notifications = rows
        .iter()
        .map(notification_from_row)
        .collect::<Result<Vec<_>>>()?;
    Ok((notifications, total, pagination.page))
}

/// Mark one notification read; NotFound unless it belongs to the user
pub async fn mark_read(pool: &SqlitePool, user_id: Uuid, notification_id: Uuid) -> Result<()> {
    let result = sqlx::query("UPDATE notifications SET read = 1 WHERE id = ? AND user_id = ?")
        .bind(notification_id.to_string())
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(yiba_common::Error::NotFound(format!(
            "Notification {}",
            notification_id
        )));
    }
    Ok(())
}

pub async fn unread_count(pool: &SqlitePool, user_id: Uuid) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read = 0")
            .bind(user_id.to_string())
            .fetch_one(pool)
            .await?;
    Ok(count)
}
