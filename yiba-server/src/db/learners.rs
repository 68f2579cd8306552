//! Learner database operations

use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::Learner;
use yiba_common::Result;

use super::audit::{self, parse_uuid, NewAudit};
use crate::pagination::{calculate_pagination, PAGE_SIZE};

fn learner_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Learner> {
    Ok(Learner {
        id: parse_uuid(row.get("id"))?,
        institution_id: parse_uuid(row.get("institution_id"))?,
        national_id: row.get("national_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        gender: row.get("gender"),
        birth_date: row.get("birth_date"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const COLUMNS: &str = "id, institution_id, national_id, first_name, last_name, email, phone, gender, birth_date, created_at, updated_at";

fn snapshot(learner: &Learner) -> serde_json::Value {
    json!({
        "national_id": learner.national_id,
        "first_name": learner.first_name,
        "last_name": learner.last_name,
        "email": learner.email,
        "phone": learner.phone,
        "gender": learner.gender,
        "birth_date": learner.birth_date,
    })
}

/// True when the institution already has this national_id on record
pub async fn national_id_exists(
    pool: &SqlitePool,
    institution_id: Uuid,
    national_id: &str,
    exclude_learner: Option<Uuid>,
) -> Result<bool> {
    let exists: bool = match exclude_learner {
        Some(id) => {
            sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM learners WHERE institution_id = ? AND national_id = ? AND id != ?)",
            )
            .bind(institution_id.to_string())
            .bind(national_id)
            .bind(id.to_string())
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM learners WHERE institution_id = ? AND national_id = ?)",
            )
            .bind(institution_id.to_string())
            .bind(national_id)
            .fetch_one(pool)
            .await?
        }
    };
    Ok(exists)
}

pub async fn insert(pool: &SqlitePool, actor_id: Uuid, learner: &Learner) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO learners (id, institution_id, national_id, first_name, last_name, email, phone, gender, birth_date)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(learner.id.to_string())
    .bind(learner.institution_id.to_string())
    .bind(&learner.national_id)
    .bind(&learner.first_name)
    .bind(&learner.last_name)
    .bind(&learner.email)
    .bind(&learner.phone)
    .bind(&learner.gender)
    .bind(&learner.birth_date)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(learner.institution_id),
            entity_type: "learner",
            entity_id: learner.id.to_string(),
            action: "create",
            before: None,
            after: Some(snapshot(learner)),
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Learner>> {
    let row = sqlx::query(&format!("SELECT {} FROM learners WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(learner_from_row).transpose()
}

/// List learners of one institution, paginated, optional name/ID search
pub async fn list(
    pool: &SqlitePool,
    institution_id: Uuid,
    search: Option<&str>,
    page: i64,
) -> Result<(Vec<Learner>, i64, i64)> {
    let mut where_sql = " WHERE institution_id = ?".to_string();
    let mut binds: Vec<String> = vec![institution_id.to_string()];

    if let Some(term) = search {
        where_sql.push_str(" AND (first_name LIKE ? OR last_name LIKE ? OR national_id LIKE ?)");
        let pattern = format!("%{}%", term.replace('%', "\\%"));
        binds.push(pattern.clone());
        binds.push(pattern.clone());
        binds.push(pattern);
    }

    let count_sql = format!("SELECT COUNT(*) FROM learners{}", where_sql);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for bind in &binds {
        count_query = count_query.bind(bind);
    }
    let total = count_query.fetch_one(pool).await?;

    let pagination = calculate_pagination(total, page);
    let rows_sql = format!(
        "SELECT {} FROM learners{} ORDER BY last_name, first_name LIMIT {} OFFSET {}",
        COLUMNS, where_sql, PAGE_SIZE, pagination.offset
    );
    let mut rows_query = sqlx::query(&rows_sql);
    for bind in &binds {
        rows_query = rows_query.bind(bind);
    }
    let rows = rows_query.fetch_all(pool).await?;

    let learners = rows.iter().map(learner_from_row).collect::<Result<Vec<_>>>()?;
    Ok((learners, total, pagination.page))
}

/// All learners of one institution (CSV export)
pub async fn list_all(pool: &SqlitePool, institution_id: Uuid) -> Result<Vec<Learner>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM learners WHERE institution_id = ? ORDER BY last_name, first_name",
        COLUMNS
    ))
    .bind(institution_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(learner_from_row).collect()
}

/// Editable learner fields
#[derive(Debug, Clone)]
pub struct LearnerUpdate {
    pub national_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
}

pub async fn update(
    pool: &SqlitePool,
    actor_id: Uuid,
    id: Uuid,
    changes: &LearnerUpdate,
) -> Result<Learner> {
    let before = find_by_id(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::NotFound(format!("Learner {}", id)))?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE learners
        SET national_id = ?, first_name = ?, last_name = ?, email = ?, phone = ?, gender = ?, birth_date = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(&changes.national_id)
    .bind(&changes.first_name)
    .bind(&changes.last_name)
    .bind(&changes.email)
    .bind(&changes.phone)
    .bind(&changes.gender)
    .bind(&changes.birth_date)
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    let after_snapshot = json!({
        "national_id": changes.national_id,
        "first_name": changes.first_name,
        "last_name": changes.last_name,
        "email": changes.email,
        "phone": changes.phone,
        "gender": changes.gender,
        "birth_date": changes.birth_date,
    });

    if let Some((diff_before, diff_after)) = audit::diff_fields(&snapshot(&before), &after_snapshot)
    {
        audit::record(
            &mut tx,
            NewAudit {
                actor_id,
                institution_id: Some(before.institution_id),
                entity_type: "learner",
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
        .ok_or_else(|| yiba_common::Error::Internal("Learner vanished mid-update".to_string()))
}

/// Delete a learner (cascades to enrolments)
pub async fn delete(pool: &SqlitePool, actor_id: Uuid, id: Uuid) -> Result<()> {
    let before = find_by_id(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::NotFound(format!("Learner {}", id)))?;

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM learners WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(before.institution_id),
            entity_type: "learner",
            entity_id: id.to_string(),
            action: "delete",
            before: Some(snapshot(&before)),
            after: None,
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}
