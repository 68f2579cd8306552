//! Enrolment database operations

use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::Enrolment;
use yiba_common::status::EnrolmentStatus;
use yiba_common::Result;

use super::audit::{self, parse_uuid, NewAudit};
use crate::pagination::{calculate_pagination, PAGE_SIZE};

fn enrolment_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Enrolment> {
    Ok(Enrolment {
        id: parse_uuid(row.get("id"))?,
        institution_id: parse_uuid(row.get("institution_id"))?,
        learner_id: parse_uuid(row.get("learner_id"))?,
        qualification_id: parse_uuid(row.get("qualification_id"))?,
        status: EnrolmentStatus::parse(&row.get::<String, _>("status"))?,
        enrolled_on: row.get("enrolled_on"),
        completed_on: row.get("completed_on"),
    })
}

const COLUMNS: &str =
    "id, institution_id, learner_id, qualification_id, status, enrolled_on, completed_on";

pub async fn insert(pool: &SqlitePool, actor_id: Uuid, enrolment: &Enrolment) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO enrolments (id, institution_id, learner_id, qualification_id, status, enrolled_on, completed_on)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(enrolment.id.to_string())
    .bind(enrolment.institution_id.to_string())
    .bind(enrolment.learner_id.to_string())
    .bind(enrolment.qualification_id.to_string())
    .bind(enrolment.status.as_str())
    .bind(&enrolment.enrolled_on)
    .bind(&enrolment.completed_on)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(enrolment.institution_id),
            entity_type: "enrolment",
            entity_id: enrolment.id.to_string(),
            action: "create",
            before: None,
            after: Some(json!({
                "learner_id": enrolment.learner_id,
                "qualification_id": enrolment.qualification_id,
                "status": enrolment.status,
                "enrolled_on": enrolment.enrolled_on,
            })),
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Enrolment>> {
    let row = sqlx::query(&format!("SELECT {} FROM enrolments WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(enrolment_from_row).transpose()
}

pub async fn exists(pool: &SqlitePool, learner_id: Uuid, qualification_id: Uuid) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM enrolments WHERE learner_id = ? AND qualification_id = ?)",
    )
    .bind(learner_id.to_string())
    .bind(qualification_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// List an institution's enrolments, optionally by status, paginated
pub async fn list(
    pool: &SqlitePool,
    institution_id: Uuid,
    status: Option<EnrolmentStatus>,
    page: i64,
) -> Result<(Vec<Enrolment>, i64, i64)> {
    let mut where_sql = " WHERE institution_id = ?".to_string();
    let mut binds: Vec<String> = vec![institution_id.to_string()];

    if let Some(status) = status {
        where_sql.push_str(" AND status = ?");
        binds.push(status.as_str().to_string());
    }

    let count_sql = format!("SELECT COUNT(*) FROM enrolments{}", where_sql);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for bind in &binds {
        count_query = count_query.bind(bind);
    }
    let total = count_query.fetch_one(pool).await?;

    let pagination = calculate_pagination(total, page);
    let rows_sql = format!(
        "SELECT {} FROM enrolments{} ORDER BY enrolled_on DESC LIMIT {} OFFSET {}",
        COLUMNS, where_sql, PAGE_SIZE, pagination.offset
    );
    let mut rows_query = sqlx::query(&rows_sql);
    for bind in &binds {
        rows_query = rows_query.bind(bind);
    }
    let rows = rows_query.fetch_all(pool).await?;

    let enrolments = rows.iter().map(enrolment_from_row).collect::<Result<Vec<_>>>()?;
    Ok((enrolments, total, pagination.page))
}

/// All enrolments of one institution (CSV export)
pub async fn list_all(pool: &SqlitePool, institution_id: Uuid) -> Result<Vec<Enrolment>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM enrolments WHERE institution_id = ? ORDER BY enrolled_on DESC",
        COLUMNS
    ))
    .bind(institution_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(enrolment_from_row).collect()
}

/// Move an enrolment through its status workflow
///
/// The transition table is enforced here so every caller gets the same
/// Conflict on an illegal move. Completing requires completed_on.
pub async fn set_status(
    pool: &SqlitePool,
    actor_id: Uuid,
    id: Uuid,
    to: EnrolmentStatus,
    completed_on: Option<String>,
) -> Result<Enrolment> {
    let before = find_by_id(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::NotFound(format!("Enrolment {}", id)))?;

    if !before.status.can_transition(to) {
        return Err(yiba_common::Error::Conflict(format!(
            "Illegal enrolment transition: {} -> {}",
            before.status.as_str(),
            to.as_str()
        )));
    }
    if to == EnrolmentStatus::Completed && completed_on.is_none() {
        return Err(yiba_common::Error::InvalidInput(
            "completed_on is required when completing an enrolment".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE enrolments SET status = ?, completed_on = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(to.as_str())
    .bind(&completed_on)
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(before.institution_id),
            entity_type: "enrolment",
            entity_id: id.to_string(),
            action: "transition",
            before: Some(json!({ "status": before.status })),
            after: Some(json!({ "status": to, "completed_on": completed_on })),
        },
    )
    .await?;

    tx.commit().await?;

    find_by_id(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::Internal("Enrolment vanished mid-update".to_string()))
}

/// Enrolment counts by status for one institution (dashboard)
pub async fn counts_by_status(
    pool: &SqlitePool,
    institution_id: Uuid,
) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM enrolments WHERE institution_id = ? GROUP BY status",
    )
    .bind(institution_id.to_string())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
