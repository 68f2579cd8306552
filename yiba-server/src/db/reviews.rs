//! Review assignment and review decision operations

use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::{Review, ReviewAssignment};
use yiba_common::Result;

use super::audit::{self, parse_uuid, NewAudit};

fn assignment_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ReviewAssignment> {
    Ok(ReviewAssignment {
        id: parse_uuid(row.get("id"))?,
        submission_id: parse_uuid(row.get("submission_id"))?,
        reviewer_id: parse_uuid(row.get("reviewer_id"))?,
        assigned_by: parse_uuid(row.get("assigned_by"))?,
        active: row.get::<i64, _>("active") != 0,
    })
}

fn review_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Review> {
    Ok(Review {
        id: parse_uuid(row.get("id"))?,
        submission_id: parse_uuid(row.get("submission_id"))?,
        reviewer_id: parse_uuid(row.get("reviewer_id"))?,
        outcome: row.get("outcome"),
        comment: row.get("comment"),
        created_at: row.get("created_at"),
    })
}

/// Create an active assignment
///
/// The partial unique index rejects a second active assignment for the
/// same (submission, reviewer) pair; that surfaces as a Conflict.
pub async fn assign(
    pool: &SqlitePool,
    actor_id: Uuid,
    institution_id: Uuid,
    submission_id: Uuid,
    reviewer_id: Uuid,
) -> Result<ReviewAssignment> {
    let id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "INSERT INTO review_assignments (id, submission_id, reviewer_id, assigned_by) VALUES (?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(submission_id.to_string())
    .bind(reviewer_id.to_string())
    .bind(actor_id.to_string())
    .execute(&mut *tx)
    .await;

    if let Err(sqlx::Error::Database(db_err)) = &result {
        if db_err.is_unique_violation() {
            return Err(yiba_common::Error::Conflict(format!(
                "Reviewer {} is already assigned to submission {}",
                reviewer_id, submission_id
            )));
        }
    }
    result?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(institution_id),
            entity_type: "review_assignment",
            entity_id: id.to_string(),
            action: "create",
            before: None,
            after: Some(json!({
                "submission_id": submission_id,
                "reviewer_id": reviewer_id,
            })),
        },
    )
    .await?;

    tx.commit().await?;

    let row = sqlx::query(
        "SELECT id, submission_id, reviewer_id, assigned_by, active FROM review_assignments WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_one(pool)
    .await?;
    assignment_from_row(&row)
}

/// Deactivate a reviewer's assignment on a submission
pub async fn unassign(
    pool: &SqlitePool,
    actor_id: Uuid,
    institution_id: Uuid,
    submission_id: Uuid,
    reviewer_id: Uuid,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE review_assignments SET active = 0 WHERE submission_id = ? AND reviewer_id = ? AND active = 1",
    )
    .bind(submission_id.to_string())
    .bind(reviewer_id.to_string())
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(yiba_common::Error::NotFound(format!(
            "No active assignment for reviewer {} on submission {}",
            reviewer_id, submission_id
        )));
    }

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(institution_id),
            entity_type: "review_assignment",
            entity_id: format!("{}/{}", submission_id, reviewer_id),
            action: "delete",
            before: Some(json!({ "active": true })),
            after: Some(json!({ "active": false })),
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Deactivate every active assignment on a submission
///
/// Called when a decision closes the review cycle; a resubmission starts
/// with a clean assignment slate.
pub async fn deactivate_all(pool: &SqlitePool, submission_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE review_assignments SET active = 0 WHERE submission_id = ? AND active = 1",
    )
    .bind(submission_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// True when the reviewer holds an active assignment on the submission
pub async fn is_assigned(
    pool: &SqlitePool,
    submission_id: Uuid,
    reviewer_id: Uuid,
) -> Result<bool> {
    let assigned: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM review_assignments WHERE submission_id = ? AND reviewer_id = ? AND active = 1)",
    )
    .bind(submission_id.to_string())
    .bind(reviewer_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(assigned)
}

pub async fn list_assignments(
    pool: &SqlitePool,
    submission_id: Uuid,
) -> Result<Vec<ReviewAssignment>> {
    let rows = sqlx::query(
        "SELECT id, submission_id, reviewer_id, assigned_by, active FROM review_assignments WHERE submission_id = ? AND active = 1 ORDER BY created_at",
    )
    .bind(submission_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(assignment_from_row).collect()
}

/// Record a review decision row
pub async fn insert_review(
    pool: &SqlitePool,
    institution_id: Uuid,
    review: &Review,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO reviews (id, submission_id, reviewer_id, outcome, comment) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(review.id.to_string())
    .bind(review.submission_id.to_string())
    .bind(review.reviewer_id.to_string())
    .bind(&review.outcome)
    .bind(&review.comment)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id: review.reviewer_id,
            institution_id: Some(institution_id),
            entity_type: "review",
            entity_id: review.id.to_string(),
            action: "create",
            before: None,
            after: Some(json!({
                "submission_id": review.submission_id,
                "outcome": review.outcome,
                "comment": review.comment,
            })),
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn list_reviews(pool: &SqlitePool, submission_id: Uuid) -> Result<Vec<Review>> {
    let rows = sqlx::query(
        "SELECT id, submission_id, reviewer_id, outcome, comment, created_at FROM reviews WHERE submission_id = ? ORDER BY created_at",
    )
    .bind(submission_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(review_from_row).collect()
}

/// Open-assignment counts per reviewer (QCTO dashboard workload)
pub async fn workload_by_reviewer(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT ra.reviewer_id, COUNT(*)
        FROM review_assignments ra
        JOIN submissions s ON s.id = ra.submission_id
        WHERE ra.active = 1 AND s.status IN ('submitted', 'under_review')
        GROUP BY ra.reviewer_id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
