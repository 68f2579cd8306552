//! Readiness (Form 5) form database operations
//!
//! Forms are created with all section rows up front; section upserts and
//! status moves are audited. The transition table lives in yiba-common.

use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::{ReadinessForm, ReadinessSection};
use yiba_common::status::{
    check_readiness_transition, ReadinessStatus, SectionStatus, READINESS_SECTION_KEYS,
};
use yiba_common::Result;

use super::audit::{self, parse_uuid, NewAudit};
use crate::pagination::{calculate_pagination, PAGE_SIZE};

fn form_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ReadinessForm> {
    Ok(ReadinessForm {
        id: parse_uuid(row.get("id"))?,
        institution_id: parse_uuid(row.get("institution_id"))?,
        qualification_id: parse_uuid(row.get("qualification_id"))?,
        status: ReadinessStatus::parse(&row.get::<String, _>("status"))?,
        submitted_at: row.get("submitted_at"),
        decided_at: row.get("decided_at"),
        decision_comment: row.get("decision_comment"),
    })
}

fn section_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ReadinessSection> {
    let payload: String = row.get("payload");
    let payload = serde_json::from_str(&payload)
        .map_err(|e| yiba_common::Error::Internal(format!("Corrupt section payload: {}", e)))?;
    Ok(ReadinessSection {
        form_id: parse_uuid(row.get("form_id"))?,
        section_key: row.get("section_key"),
        payload,
        status: SectionStatus::parse(&row.get::<String, _>("status"))?,
        updated_at: row.get("updated_at"),
    })
}

const FORM_COLUMNS: &str =
    "id, institution_id, qualification_id, status, submitted_at, decided_at, decision_comment";

/// Create a form plus one row per fixed section
pub async fn create(
    pool: &SqlitePool,
    actor_id: Uuid,
    institution_id: Uuid,
    qualification_id: Uuid,
) -> Result<ReadinessForm> {
    let id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO readiness_forms (id, institution_id, qualification_id) VALUES (?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(institution_id.to_string())
    .bind(qualification_id.to_string())
    .execute(&mut *tx)
    .await?;

    for key in READINESS_SECTION_KEYS {
        sqlx::query("INSERT INTO readiness_sections (form_id, section_key) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(key)
            .execute(&mut *tx)
            .await?;
    }

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(institution_id),
            entity_type: "readiness_form",
            entity_id: id.to_string(),
            action: "create",
            before: None,
            after: Some(json!({
                "qualification_id": qualification_id,
                "status": ReadinessStatus::Draft,
            })),
        },
    )
    .await?;

    tx.commit().await?;

    find_by_id(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::Internal("Readiness form vanished after create".to_string()))
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<ReadinessForm>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM readiness_forms WHERE id = ?",
        FORM_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(form_from_row).transpose()
}

pub async fn exists_for_qualification(
    pool: &SqlitePool,
    institution_id: Uuid,
    qualification_id: Uuid,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM readiness_forms WHERE institution_id = ? AND qualification_id = ?)",
    )
    .bind(institution_id.to_string())
    .bind(qualification_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn sections(pool: &SqlitePool, form_id: Uuid) -> Result<Vec<ReadinessSection>> {
    let rows = sqlx::query(
        "SELECT form_id, section_key, payload, status, updated_at FROM readiness_sections WHERE form_id = ? ORDER BY section_key",
    )
    .bind(form_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(section_from_row).collect()
}

/// List forms, scoped to an institution or platform-wide, paginated
pub async fn list(
    pool: &SqlitePool,
    institution_id: Option<Uuid>,
    status: Option<ReadinessStatus>,
    page: i64,
) -> Result<(Vec<ReadinessForm>, i64, i64)> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    if let Some(id) = institution_id {
        clauses.push("institution_id = ?");
        binds.push(id.to_string());
    }
    if let Some(status) = status {
        clauses.push("status = ?");
        binds.push(status.as_str().to_string());
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM readiness_forms{}", where_sql);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for bind in &binds {
        count_query = count_query.bind(bind);
    }
    let total = count_query.fetch_one(pool).await?;

    let pagination = calculate_pagination(total, page);
    let rows_sql = format!(
        "SELECT {} FROM readiness_forms{} ORDER BY created_at DESC LIMIT {} OFFSET {}",
        FORM_COLUMNS, where_sql, PAGE_SIZE, pagination.offset
    );
    let mut rows_query = sqlx::query(&rows_sql);
    for bind in &binds {
        rows_query = rows_query.bind(bind);
    }
    let rows = rows_query.fetch_all(pool).await?;

    let forms = rows.iter().map(form_from_row).collect::<Result<Vec<_>>>()?;
    Ok((forms, total, pagination.page))
}

/// Upsert a section payload, auditing the field diff
///
/// Writing a section on a draft form moves the form to in_progress.
pub async fn upsert_section(
    pool: &SqlitePool,
    actor_id: Uuid,
    form: &ReadinessForm,
    section_key: &str,
    payload: &serde_json::Value,
    status: SectionStatus,
) -> Result<ReadinessSection> {
    if !READINESS_SECTION_KEYS.contains(&section_key) {
        return Err(yiba_common::Error::InvalidInput(format!(
            "Unknown readiness section: {}",
            section_key
        )));
    }

    let before_row = sqlx::query(
        "SELECT form_id, section_key, payload, status, updated_at FROM readiness_sections WHERE form_id = ? AND section_key = ?",
    )
    .bind(form.id.to_string())
    .bind(section_key)
    .fetch_optional(pool)
    .await?;
    let before = before_row.as_ref().map(section_from_row).transpose()?;

    let payload_text = serde_json::to_string(payload)
        .map_err(|e| yiba_common::Error::Internal(format!("Failed to serialize payload: {}", e)))?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO readiness_sections (form_id, section_key, payload, status, updated_at)
        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(form_id, section_key) DO UPDATE SET
            payload = excluded.payload,
            status = excluded.status,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(form.id.to_string())
    .bind(section_key)
    .bind(&payload_text)
    .bind(status.as_str())
    .execute(&mut *tx)
    .await?;

    // First section write pulls a draft form into progress
    if form.status == ReadinessStatus::Draft {
        sqlx::query(
            "UPDATE readiness_forms SET status = 'in_progress', updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(form.id.to_string())
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            NewAudit {
                actor_id,
                institution_id: Some(form.institution_id),
                entity_type: "readiness_form",
                entity_id: form.id.to_string(),
                action: "transition",
                before: Some(json!({ "status": ReadinessStatus::Draft })),
                after: Some(json!({ "status": ReadinessStatus::InProgress })),
            },
        )
        .await?;
    }

    let before_snapshot = before
        .as_ref()
        .map(|s| json!({ "payload": s.payload, "status": s.status }))
        .unwrap_or(serde_json::Value::Null);
    let after_snapshot = json!({ "payload": payload, "status": status });

    if let Some((diff_before, diff_after)) = audit::diff_fields(&before_snapshot, &after_snapshot) {
        audit::record(
            &mut tx,
            NewAudit {
                actor_id,
                institution_id: Some(form.institution_id),
                entity_type: "readiness_section",
                entity_id: format!("{}/{}", form.id, section_key),
                action: "update",
                before: Some(diff_before),
                after: Some(diff_after),
            },
        )
        .await?;
    }

    tx.commit().await?;

    let row = sqlx::query(
        "SELECT form_id, section_key, payload, status, updated_at FROM readiness_sections WHERE form_id = ? AND section_key = ?",
    )
    .bind(form.id.to_string())
    .bind(section_key)
    .fetch_one(pool)
    .await?;
    section_from_row(&row)
}

/// Count sections not yet marked complete
pub async fn incomplete_section_count(pool: &SqlitePool, form_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM readiness_sections WHERE form_id = ? AND status != 'complete'",
    )
    .bind(form_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Move a form through its status workflow, auditing the transition
pub async fn set_status(
    pool: &SqlitePool,
    actor_id: Uuid,
    form: &ReadinessForm,
    to: ReadinessStatus,
    comment: Option<&str>,
) -> Result<ReadinessForm> {
    check_readiness_transition(form.status, to)?;

    let now = chrono::Utc::now().to_rfc3339();
    let submitted_at = if to == ReadinessStatus::Submitted {
        Some(now.clone())
    } else {
        form.submitted_at.clone()
    };
    let decided_at = if matches!(
        to,
        ReadinessStatus::Approved | ReadinessStatus::Rejected | ReadinessStatus::Returned
    ) {
        Some(now)
    } else {
        form.decided_at.clone()
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE readiness_forms
        SET status = ?, submitted_at = ?, decided_at = ?, decision_comment = COALESCE(?, decision_comment),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(to.as_str())
    .bind(&submitted_at)
    .bind(&decided_at)
    .bind(comment)
    .bind(form.id.to_string())
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(form.institution_id),
            entity_type: "readiness_form",
            entity_id: form.id.to_string(),
            action: "transition",
            before: Some(json!({ "status": form.status })),
            after: Some(json!({ "status": to, "comment": comment })),
        },
    )
    .await?;

    tx.commit().await?;

    find_by_id(pool, form.id)
        .await?
        .ok_or_else(|| yiba_common::Error::Internal("Readiness form vanished mid-update".to_string()))
}

/// Form counts by status, optionally scoped to one institution (dashboard)
pub async fn counts_by_status(
    pool: &SqlitePool,
    institution_id: Option<Uuid>,
) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = match institution_id {
        Some(id) => {
            sqlx::query_as(
                "SELECT status, COUNT(*) FROM readiness_forms WHERE institution_id = ? GROUP BY status",
            )
            .bind(id.to_string())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as("SELECT status, COUNT(*) FROM readiness_forms GROUP BY status")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows)
}
