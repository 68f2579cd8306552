//! Qualification registry operations

use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::Qualification;
use yiba_common::Result;

use super::audit::{self, parse_uuid, NewAudit};

fn qualification_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Qualification> {
    Ok(Qualification {
        id: parse_uuid(row.get("id"))?,
        code: row.get("code"),
        title: row.get("title"),
        nqf_level: row.get("nqf_level"),
        curriculum_code: row.get("curriculum_code"),
        active: row.get::<i64, _>("active") != 0,
    })
}

const COLUMNS: &str = "id, code, title, nqf_level, curriculum_code, active";

fn snapshot(q: &Qualification) -> serde_json::Value {
    json!({
        "code": q.code,
        "title": q.title,
        "nqf_level": q.nqf_level,
        "curriculum_code": q.curriculum_code,
        "active": q.active,
    })
}

pub async fn insert(pool: &SqlitePool, actor_id: Uuid, q: &Qualification) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO qualifications (id, code, title, nqf_level, curriculum_code, active)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(q.id.to_string())
    .bind(&q.code)
    .bind(&q.title)
    .bind(q.nqf_level)
    .bind(&q.curriculum_code)
    .bind(q.active as i64)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: None,
            entity_type: "qualification",
            entity_id: q.id.to_string(),
            action: "create",
            before: None,
            after: Some(snapshot(q)),
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Qualification>> {
    let row = sqlx::query(&format!("SELECT {} FROM qualifications WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(qualification_from_row).transpose()
}

pub async fn code_exists(pool: &SqlitePool, code: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM qualifications WHERE code = ?)")
            .bind(code)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

/// Full registry, active first then by code
pub async fn list(pool: &SqlitePool) -> Result<Vec<Qualification>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM qualifications ORDER BY active DESC, code",
        COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(qualification_from_row).collect()
}

/// Editable qualification fields
#[derive(Debug, Clone)]
pub struct QualificationUpdate {
    pub title: String,
    pub nqf_level: i64,
    pub curriculum_code: Option<String>,
    pub active: bool,
}

pub async fn update(
    pool: &SqlitePool,
    actor_id: Uuid,
    id: Uuid,
    changes: &QualificationUpdate,
) -> Result<Qualification> {
    let before = find_by_id(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::NotFound(format!("Qualification {}", id)))?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE qualifications
        SET title = ?, nqf_level = ?, curriculum_code = ?, active = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(&changes.title)
    .bind(changes.nqf_level)
    .bind(&changes.curriculum_code)
    .bind(changes.active as i64)
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    let after_snapshot = json!({
        "code": before.code,
        "title": changes.title,
        "nqf_level": changes.nqf_level,
        "curriculum_code": changes.curriculum_code,
        "active": changes.active,
    });

    if let Some((diff_before, diff_after)) = audit::diff_fields(&snapshot(&before), &after_snapshot)
    {
        audit::record(
            &mut tx,
            NewAudit {
                actor_id,
                institution_id: None,
                entity_type: "qualification",
                entity_id: id.to_string(),
                action: "update",
                before: Some(diff_before),
                after: Some(diff_after),
            },
        )
        .await?;
    }

    tx.commit().await?;

    find_by_id(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::Internal("Qualification vanished mid-update".to_string()))
}
