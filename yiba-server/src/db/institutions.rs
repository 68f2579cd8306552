//! Institution database operations

use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::Institution;
use yiba_common::status::InstitutionStatus;
use yiba_common::Result;

use super::audit::{self, parse_uuid, NewAudit};
use crate::pagination::{calculate_pagination, PAGE_SIZE};

fn institution_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Institution> {
    Ok(Institution {
        id: parse_uuid(row.get("id"))?,
        name: row.get("name"),
        trading_name: row.get("trading_name"),
        sdl_number: row.get("sdl_number"),
        contact_email: row.get("contact_email"),
        phone: row.get("phone"),
        province: row.get("province"),
        status: InstitutionStatus::parse(&row.get::<String, _>("status"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const COLUMNS: &str =
    "id, name, trading_name, sdl_number, contact_email, phone, province, status, created_at, updated_at";

fn snapshot(inst: &Institution) -> serde_json::Value {
    json!({
        "name": inst.name,
        "trading_name": inst.trading_name,
        "sdl_number": inst.sdl_number,
        "contact_email": inst.contact_email,
        "phone": inst.phone,
        "province": inst.province,
        "status": inst.status,
    })
}

/// Insert an institution with its audit row
pub async fn insert(pool: &SqlitePool, actor_id: Uuid, inst: &Institution) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO institutions (id, name, trading_name, sdl_number, contact_email, phone, province, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(inst.id.to_string())
    .bind(&inst.name)
    .bind(&inst.trading_name)
    .bind(&inst.sdl_number)
    .bind(&inst.contact_email)
    .bind(&inst.phone)
    .bind(&inst.province)
    .bind(inst.status.as_str())
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(inst.id),
            entity_type: "institution",
            entity_id: inst.id.to_string(),
            action: "create",
            before: None,
            after: Some(snapshot(inst)),
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Institution>> {
    let row = sqlx::query(&format!("SELECT {} FROM institutions WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(institution_from_row).transpose()
}

/// Filters for institution listing
#[derive(Debug, Default, Clone)]
pub struct InstitutionFilter {
    pub status: Option<InstitutionStatus>,
    pub province: Option<String>,
    /// Substring match on name or trading name
    pub name: Option<String>,
}

/// List institutions, paginated, optionally restricted to given ids
pub async fn list(
    pool: &SqlitePool,
    filter: &InstitutionFilter,
    page: i64,
) -> Result<(Vec<Institution>, i64, i64)> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    if let Some(status) = &filter.status {
        clauses.push("status = ?");
        binds.push(status.as_str().to_string());
    }
    if let Some(province) = &filter.province {
        clauses.push("province = ?");
        binds.push(province.clone());
    }
    if let Some(name) = &filter.name {
        clauses.push("(name LIKE ? OR trading_name LIKE ?)");
        let pattern = format!("%{}%", name.replace('%', "\\%"));
        binds.push(pattern.clone());
        binds.push(pattern);
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM institutions{}", where_sql);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for bind in &binds {
        count_query = count_query.bind(bind);
    }
    let total = count_query.fetch_one(pool).await?;

    let pagination = calculate_pagination(total, page);
    let rows_sql = format!(
        "SELECT {} FROM institutions{} ORDER BY name LIMIT {} OFFSET {}",
        COLUMNS, where_sql, PAGE_SIZE, pagination.offset
    );
    let mut rows_query = sqlx::query(&rows_sql);
    for bind in &binds {
        rows_query = rows_query.bind(bind);
    }
    let rows = rows_query.fetch_all(pool).await?;

    let institutions = rows
        .iter()
        .map(institution_from_row)
        .collect::<Result<Vec<_>>>()?;
    Ok((institutions, total, pagination.page))
}

/// Editable institution fields
#[derive(Debug, Clone)]
pub struct InstitutionUpdate {
    pub name: String,
    pub trading_name: Option<String>,
    pub sdl_number: Option<String>,
    pub contact_email: String,
    pub phone: Option<String>,
    pub province: Option<String>,
}

/// Update institution details with a field-level audit diff
pub async fn update(
    pool: &SqlitePool,
    actor_id: Uuid,
    id: Uuid,
    changes: &InstitutionUpdate,
) -> Result<Institution> {
    let before = find_by_id(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::NotFound(format!("Institution {}", id)))?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE institutions
        SET name = ?, trading_name = ?, sdl_number = ?, contact_email = ?, phone = ?, province = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(&changes.name)
    .bind(&changes.trading_name)
    .bind(&changes.sdl_number)
    .bind(&changes.contact_email)
    .bind(&changes.phone)
    .bind(&changes.province)
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    let after_snapshot = json!({
        "name": changes.name,
        "trading_name": changes.trading_name,
        "sdl_number": changes.sdl_number,
        "contact_email": changes.contact_email,
        "phone": changes.phone,
        "province": changes.province,
        "status": before.status,
    });

    if let Some((diff_before, diff_after)) = audit::diff_fields(&snapshot(&before), &after_snapshot)
    {
        audit::record(
            &mut tx,
            NewAudit {
                actor_id,
                institution_id: Some(id),
                entity_type: "institution",
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
        .ok_or_else(|| yiba_common::Error::Internal("Institution vanished mid-update".to_string()))
}

/// Change institution lifecycle status
pub async fn set_status(
    pool: &SqlitePool,
    actor_id: Uuid,
    id: Uuid,
    status: InstitutionStatus,
) -> Result<Institution> {
    let before = find_by_id(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::NotFound(format!("Institution {}", id)))?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE institutions SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(id),
            entity_type: "institution",
            entity_id: id.to_string(),
            action: "transition",
            before: Some(json!({ "status": before.status })),
            after: Some(json!({ "status": status })),
        },
    )
    .await?;

    tx.commit().await?;

    find_by_id(pool, id)
        .await?
        .ok_or_else(|| yiba_common::Error::Internal("Institution vanished mid-update".to_string()))
}
