//! Submission database operations
//!
//! Includes the QCTO read-scoping query: a reviewer may read an
//! institution only when it has a non-draft submission or the reviewer
//! holds an active assignment there.

use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::Submission;
use yiba_common::status::{check_submission_transition, SubmissionStatus};
use yiba_common::Result;

use super::audit::{self, parse_uuid, NewAudit};
use crate::pagination::{calculate_pagination, PAGE_SIZE};

fn submission_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Submission> {
    Ok(Submission {
        id: parse_uuid(row.get("id"))?,
        institution_id: parse_uuid(row.get("institution_id"))?,
        readiness_form_id: row
            .get::<Option<String>, _>("readiness_form_id")
            .map(parse_uuid)
            .transpose()?,
        title: row.get("title"),
        status: SubmissionStatus::parse(&row.get::<String, _>("status"))?,
        submitted_at: row.get("submitted_at"),
        decided_at: row.get("decided_at"),
    })
}

const COLUMNS: &str =
    "id, institution_id, readiness_form_id, title, status, submitted_at, decided_at";

pub async fn insert(pool: &SqlitePool, actor_id: Uuid, submission: &Submission) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO submissions (id, institution_id, readiness_form_id, title, status)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(submission.id.to_string())
    .bind(submission.institution_id.to_string())
    .bind(submission.readiness_form_id.map(|id| id.to_string()))
    .bind(&submission.title)
    .bind(submission.status.as_str())
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(submission.institution_id),
            entity_type: "submission",
            entity_id: submission.id.to_string(),
            action: "create",
            before: None,
            after: Some(json!({
                "title": submission.title,
                "status": submission.status,
                "readiness_form_id": submission.readiness_form_id,
            })),
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Submission>> {
    let row = sqlx::query(&format!("SELECT {} FROM submissions WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(submission_from_row).transpose()
}

/// Scope for submission listing
#[derive(Debug, Clone)]
pub enum SubmissionScope {
    /// One institution's submissions (institution users)
    Institution(Uuid),
    /// Submissions assigned to a reviewer, drafts excluded
    Reviewer(Uuid),
    /// Everything non-draft (QCTO admin) plus drafts for platform admin
    All { include_drafts: bool },
}

/// List submissions under a scope, optionally by status, paginated
pub async fn list(
    pool: &SqlitePool,
    scope: &SubmissionScope,
    status: Option<SubmissionStatus>,
    page: i64,
) -> Result<(Vec<Submission>, i64, i64)> {
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    match scope {
        SubmissionScope::Institution(id) => {
            clauses.push("institution_id = ?".to_string());
            binds.push(id.to_string());
        }
        SubmissionScope::Reviewer(reviewer_id) => {
            clauses.push(
                "id IN (SELECT submission_id FROM review_assignments WHERE reviewer_id = ? AND active = 1)"
                    .to_string(),
            );
            binds.push(reviewer_id.to_string());
            clauses.push("status != 'draft'".to_string());
        }
        SubmissionScope::All { include_drafts } => {
            if !include_drafts {
                clauses.push("status != 'draft'".to_string());
            }
        }
    }

    if let Some(status) = status {
        clauses.push("status = ?".to_string());
        binds.push(status.as_str().to_string());
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM submissions{}", where_sql);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for bind in &binds {
        count_query = count_query.bind(bind);
    }
    let total = count_query.fetch_one(pool).await?;

    let pagination = calculate_pagination(total, page);
    let rows_sql = format!(
        "SELECT {} FROM submissions{} ORDER BY created_at DESC LIMIT {} OFFSET {}",
        COLUMNS, where_sql, PAGE_SIZE, pagination.offset
    );
    let mut rows_query = sqlx::query(&rows_sql);
    for bind in &binds {
        rows_query = rows_query.bind(bind);
    }
    let rows = rows_query.fetch_all(pool).await?;

    let submissions = rows
        .iter()
        .map(submission_from_row)
        .collect::<Result<Vec<_>>>()?;
    Ok((submissions, total, pagination.page))
}

/// Attach a document to an editable submission
pub async fn add_item(
    pool: &SqlitePool,
    actor_id: Uuid,
    submission: &Submission,
    document_id: Uuid,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT OR IGNORE INTO submission_items (submission_id, document_id) VALUES (?, ?)",
    )
    .bind(submission.id.to_string())
    .bind(document_id.to_string())
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(submission.institution_id),
            entity_type: "submission",
            entity_id: submission.id.to_string(),
            action: "update",
            before: None,
            after: Some(json!({ "added_document_id": document_id })),
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Detach a document from an editable submission
pub async fn remove_item(
    pool: &SqlitePool,
    actor_id: Uuid,
    submission: &Submission,
    document_id: Uuid,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "DELETE FROM submission_items WHERE submission_id = ? AND document_id = ?",
    )
    .bind(submission.id.to_string())
    .bind(document_id.to_string())
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(yiba_common::Error::NotFound(format!(
            "Document {} is not attached to submission {}",
            document_id, submission.id
        )));
    }

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(submission.institution_id),
            entity_type: "submission",
            entity_id: submission.id.to_string(),
            action: "update",
            before: Some(json!({ "removed_document_id": document_id })),
            after: None,
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn item_count(pool: &SqlitePool, submission_id: Uuid) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM submission_items WHERE submission_id = ?")
            .bind(submission_id.to_string())
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Move a submission through its status workflow, auditing the transition
pub async fn set_status(
    pool: &SqlitePool,
    actor_id: Uuid,
    submission: &Submission,
    to: SubmissionStatus,
) -> Result<Submission> {
    check_submission_transition(submission.status, to)?;

    let now = chrono::Utc::now().to_rfc3339();
    let submitted_at = if to == SubmissionStatus::Submitted {
        Some(now.clone())
    } else {
        submission.submitted_at.clone()
    };
    let decided_at = if matches!(
        to,
        SubmissionStatus::Accepted | SubmissionStatus::Declined | SubmissionStatus::Returned
    ) {
        Some(now)
    } else {
        submission.decided_at.clone()
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE submissions
        SET status = ?, submitted_at = ?, decided_at = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(to.as_str())
    .bind(&submitted_at)
    .bind(&decided_at)
    .bind(submission.id.to_string())
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(submission.institution_id),
            entity_type: "submission",
            entity_id: submission.id.to_string(),
            action: "transition",
            before: Some(json!({ "status": submission.status })),
            after: Some(json!({ "status": to })),
        },
    )
    .await?;

    tx.commit().await?;

    find_by_id(pool, submission.id)
        .await?
        .ok_or_else(|| yiba_common::Error::Internal("Submission vanished mid-update".to_string()))
}

/// QCTO read scoping: reviewer visibility into an institution
///
/// True when the institution has at least one non-draft submission, or
/// the reviewer holds an active assignment on any of its submissions.
pub async fn reviewer_can_read_institution(
    pool: &SqlitePool,
    reviewer_id: Uuid,
    institution_id: Uuid,
) -> Result<bool> {
    let visible: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM submissions
            WHERE institution_id = ? AND status != 'draft'
        ) OR EXISTS(
            SELECT 1 FROM review_assignments ra
            JOIN submissions s ON s.id = ra.submission_id
            WHERE s.institution_id = ? AND ra.reviewer_id = ? AND ra.active = 1
        )
        "#,
    )
    .bind(institution_id.to_string())
    .bind(institution_id.to_string())
    .bind(reviewer_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(visible)
}

/// Submission counts by status (dashboard), optionally scoped
pub async fn counts_by_status(
    pool: &SqlitePool,
    institution_id: Option<Uuid>,
) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = match institution_id {
        Some(id) => {
            sqlx::query_as(
                "SELECT status, COUNT(*) FROM submissions WHERE institution_id = ? GROUP BY status",
            )
            .bind(id.to_string())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT status, COUNT(*) FROM submissions WHERE status != 'draft' GROUP BY status",
            )
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}
