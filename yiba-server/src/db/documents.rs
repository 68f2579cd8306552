//! Document metadata database operations
//!
//! Blob bytes live in the DocumentStore; this module owns the metadata
//! rows and the per-institution sha256 dedup lookup.

use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::Document;
use yiba_common::Result;

use super::audit::{self, parse_uuid, NewAudit};
use crate::pagination::{calculate_pagination, PAGE_SIZE};

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    Ok(Document {
        id: parse_uuid(row.get("id"))?,
        institution_id: parse_uuid(row.get("institution_id"))?,
        owner_user_id: parse_uuid(row.get("owner_user_id"))?,
        file_name: row.get("file_name"),
        content_type: row.get("content_type"),
        size_bytes: row.get("size_bytes"),
        sha256: row.get("sha256"),
        storage_key: row.get("storage_key"),
        kind: row.get("kind"),
        readiness_form_id: row
            .get::<Option<String>, _>("readiness_form_id")
            .map(parse_uuid)
            .transpose()?,
        readiness_section_key: row.get("readiness_section_key"),
        created_at: row.get("created_at"),
    })
}

const COLUMNS: &str = "id, institution_id, owner_user_id, file_name, content_type, size_bytes, sha256, storage_key, kind, readiness_form_id, readiness_section_key, created_at";

/// Find an existing document with identical bytes at this institution
pub async fn find_by_sha256(
    pool: &SqlitePool,
    institution_id: Uuid,
    sha256: &str,
) -> Result<Option<Document>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM documents WHERE institution_id = ? AND sha256 = ?",
        COLUMNS
    ))
    .bind(institution_id.to_string())
    .bind(sha256)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(document_from_row).transpose()
}

pub async fn insert(pool: &SqlitePool, actor_id: Uuid, doc: &Document) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO documents (id, institution_id, owner_user_id, file_name, content_type, size_bytes, sha256, storage_key, kind, readiness_form_id, readiness_section_key)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(doc.id.to_string())
    .bind(doc.institution_id.to_string())
    .bind(doc.owner_user_id.to_string())
    .bind(&doc.file_name)
    .bind(&doc.content_type)
    .bind(doc.size_bytes)
    .bind(&doc.sha256)
    .bind(&doc.storage_key)
    .bind(&doc.kind)
    .bind(doc.readiness_form_id.map(|id| id.to_string()))
    .bind(&doc.readiness_section_key)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(doc.institution_id),
            entity_type: "document",
            entity_id: doc.id.to_string(),
            action: "create",
            before: None,
            after: Some(json!({
                "file_name": doc.file_name,
                "content_type": doc.content_type,
                "size_bytes": doc.size_bytes,
                "sha256": doc.sha256,
                "kind": doc.kind,
            })),
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Document>> {
    let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(document_from_row).transpose()
}

/// List an institution's documents, optionally by kind, paginated
pub async fn list(
    pool: &SqlitePool,
    institution_id: Uuid,
    kind: Option<&str>,
    page: i64,
) -> Result<(Vec<Document>, i64, i64)> {
    let mut where_sql = " WHERE institution_id = ?".to_string();
    let mut binds: Vec<String> = vec![institution_id.to_string()];

    if let Some(kind) = kind {
        where_sql.push_str(" AND kind = ?");
        binds.push(kind.to_string());
    }

    let count_sql = format!("SELECT COUNT(*) FROM documents{}", where_sql);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for bind in &binds {
        count_query = count_query.bind(bind);
    }
    let total = count_query.fetch_one(pool).await?;

    let pagination = calculate_pagination(total, page);
    let rows_sql = format!(
        "SELECT {} FROM documents{} ORDER BY created_at DESC LIMIT {} OFFSET {}",
        COLUMNS, where_sql, PAGE_SIZE, pagination.offset
    );
    let mut rows_query = sqlx::query(&rows_sql);
    for bind in &binds {
        rows_query = rows_query.bind(bind);
    }
    let rows = rows_query.fetch_all(pool).await?;

    let documents = rows.iter().map(document_from_row).collect::<Result<Vec<_>>>()?;
    Ok((documents, total, pagination.page))
}

/// Documents attached to a submission
pub async fn list_for_submission(pool: &SqlitePool, submission_id: Uuid) -> Result<Vec<Document>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM documents d JOIN submission_items si ON si.document_id = d.id WHERE si.submission_id = ? ORDER BY si.added_at",
        COLUMNS
            .split(", ")
            .map(|c| format!("d.{}", c))
            .collect::<Vec<_>>()
            .join(", ")
    ))
    .bind(submission_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(document_from_row).collect()
}

/// Documents attached to a readiness form
pub async fn list_for_readiness_form(pool: &SqlitePool, form_id: Uuid) -> Result<Vec<Document>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM documents WHERE readiness_form_id = ? ORDER BY created_at",
        COLUMNS
    ))
    .bind(form_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(document_from_row).collect()
}

/// Delete a document row, auditing the removal
///
/// The caller deletes the blob after the row is gone; an orphan blob is
/// recoverable, an orphan row is not.
pub async fn delete(pool: &SqlitePool, actor_id: Uuid, doc: &Document) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(doc.id.to_string())
        .execute(&mut *tx)
        .await?;

    audit::record(
        &mut tx,
        NewAudit {
            actor_id,
            institution_id: Some(doc.institution_id),
            entity_type: "document",
            entity_id: doc.id.to_string(),
            action: "delete",
            before: Some(json!({
                "file_name": doc.file_name,
                "sha256": doc.sha256,
                "kind": doc.kind,
            })),
            after: None,
        },
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// True when the document is attached to any non-terminal submission
pub async fn in_open_submission(pool: &SqlitePool, document_id: Uuid) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM submission_items si
            JOIN submissions s ON s.id = si.submission_id
            WHERE si.document_id = ? AND s.status NOT IN ('accepted', 'declined')
        )
        "#,
    )
    .bind(document_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(exists)
}
