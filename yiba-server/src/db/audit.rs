//! Audit log writes and queries
//!
//! Every audited mutation inserts its audit row inside the same
//! transaction as the mutation, so the log can never disagree with the
//! data. before/after JSON carries only the fields that changed.

use serde_json::{Map, Value};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;
use yiba_common::db::models::AuditEntry;
use yiba_common::Result;

use crate::pagination::{calculate_pagination, PAGE_SIZE};

/// Audit row to be written alongside a mutation
#[derive(Debug, Clone)]
pub struct NewAudit {
    pub actor_id: Uuid,
    pub institution_id: Option<Uuid>,
    pub entity_type: &'static str,
    pub entity_id: String,
    /// One of: create, update, delete, transition
    pub action: &'static str,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Reduce full before/after snapshots to changed fields only
///
/// Both values must be JSON objects. Returns None when nothing changed,
/// in which case no audit row should be written.
pub fn diff_fields(before: &Value, after: &Value) -> Option<(Value, Value)> {
    let (before_map, after_map) = match (before.as_object(), after.as_object()) {
        (Some(b), Some(a)) => (b, a),
        // Non-object snapshots are recorded verbatim
        _ => {
            return if before == after {
                None
            } else {
                Some((before.clone(), after.clone()))
            }
        }
    };

    let mut changed_before = Map::new();
    let mut changed_after = Map::new();

    for (key, after_value) in after_map {
        let before_value = before_map.get(key).unwrap_or(&Value::Null);
        if before_value != after_value {
            changed_before.insert(key.clone(), before_value.clone());
            changed_after.insert(key.clone(), after_value.clone());
        }
    }
    // Fields removed entirely
    for (key, before_value) in before_map {
        if !after_map.contains_key(key) {
            changed_before.insert(key.clone(), before_value.clone());
            changed_after.insert(key.clone(), Value::Null);
        }
    }

    if changed_after.is_empty() && changed_before.is_empty() {
        None
    } else {
        Some((Value::Object(changed_before), Value::Object(changed_after)))
    }
}

/// Insert an audit row within the caller's transaction
pub async fn record(tx: &mut Transaction<'_, Sqlite>, audit: NewAudit) -> Result<()> {
    let before_json = audit
        .before
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(|e| yiba_common::Error::Internal(format!("Failed to serialize audit before: {}", e)))?;
    let after_json = audit
        .after
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(|e| yiba_common::Error::Internal(format!("Failed to serialize audit after: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO audit_log (id, actor_id, institution_id, entity_type, entity_id, action, before_json, after_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(audit.actor_id.to_string())
    .bind(audit.institution_id.map(|id| id.to_string()))
    .bind(audit.entity_type)
    .bind(&audit.entity_id)
    .bind(audit.action)
    .bind(before_json)
    .bind(after_json)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Filters for audit log queries
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    /// Restrict to one institution's rows (tenancy scoping)
    pub institution_id: Option<Uuid>,
    /// RFC3339 / SQLite timestamp lower bound, inclusive
    pub from: Option<String>,
    /// Upper bound, inclusive
    pub to: Option<String>,
}

fn filter_clauses(filter: &AuditFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    if let Some(entity_type) = &filter.entity_type {
        clauses.push("entity_type = ?");
        binds.push(entity_type.clone());
    }
    if let Some(entity_id) = &filter.entity_id {
        clauses.push("entity_id = ?");
        binds.push(entity_id.clone());
    }
    if let Some(actor_id) = &filter.actor_id {
        clauses.push("actor_id = ?");
        binds.push(actor_id.to_string());
    }
    if let Some(action) = &filter.action {
        clauses.push("action = ?");
        binds.push(action.clone());
    }
    if let Some(institution_id) = &filter.institution_id {
        clauses.push("institution_id = ?");
        binds.push(institution_id.to_string());
    }
    if let Some(from) = &filter.from {
        clauses.push("created_at >= ?");
        binds.push(from.clone());
    }
    if let Some(to) = &filter.to {
        clauses.push("created_at <= ?");
        binds.push(to.clone());
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (where_sql, binds)
}

/// Query the audit log, newest first, paginated
pub async fn query(
    pool: &SqlitePool,
    filter: &AuditFilter,
    page: i64,
) -> Result<(Vec<AuditEntry>, i64, i64)> {
    let (where_sql, binds) = filter_clauses(filter);

    let count_sql = format!("SELECT COUNT(*) FROM audit_log{}", where_sql);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for bind in &binds {
        count_query = count_query.bind(bind);
    }
    let total: i64 = count_query.fetch_one(pool).await?;

    let pagination = calculate_pagination(total, page);

    let rows_sql = format!(
        "SELECT id, actor_id, institution_id, entity_type, entity_id, action, before_json, after_json, created_at \
         FROM audit_log{} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
        where_sql, PAGE_SIZE, pagination.offset
    );
    let mut rows_query = sqlx::query(&rows_sql);
    for bind in &binds {
        rows_query = rows_query.bind(bind);
    }
    let rows = rows_query.fetch_all(pool).await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        entries.push(entry_from_row(&row)?);
    }

    Ok((entries, total, pagination.page))
}

/// Export the full filtered audit log (no pagination), oldest first
pub async fn query_all(pool: &SqlitePool, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
    let (where_sql, binds) = filter_clauses(filter);
    let rows_sql = format!(
        "SELECT id, actor_id, institution_id, entity_type, entity_id, action, before_json, after_json, created_at \
         FROM audit_log{} ORDER BY created_at ASC, id ASC",
        where_sql
    );
    let mut rows_query = sqlx::query(&rows_sql);
    for bind in &binds {
        rows_query = rows_query.bind(bind);
    }
    let rows = rows_query.fetch_all(pool).await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        entries.push(entry_from_row(&row)?);
    }
    Ok(entries)
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEntry> {
    let parse_json = |text: Option<String>| -> Result<Option<Value>> {
        text.map(|t| serde_json::from_str(&t))
            .transpose()
            .map_err(|e| yiba_common::Error::Internal(format!("Corrupt audit JSON: {}", e)))
    };

    Ok(AuditEntry {
        id: parse_uuid(row.get("id"))?,
        actor_id: parse_uuid(row.get("actor_id"))?,
        institution_id: row
            .get::<Option<String>, _>("institution_id")
            .map(|s| parse_uuid(s))
            .transpose()?,
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        action: row.get("action"),
        before: parse_json(row.get("before_json"))?,
        after: parse_json(row.get("after_json"))?,
        created_at: row.get("created_at"),
    })
}

pub(crate) fn parse_uuid(s: String) -> Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| yiba_common::Error::Internal(format!("Corrupt UUID: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_reports_changed_fields_only() {
        let before = json!({"name": "Ikhaya College", "status": "pending", "phone": "011"});
        let after = json!({"name": "Ikhaya College", "status": "active", "phone": "011"});

        let (b, a) = diff_fields(&before, &after).unwrap();
        assert_eq!(b, json!({"status": "pending"}));
        assert_eq!(a, json!({"status": "active"}));
    }

    #[test]
    fn test_diff_none_when_unchanged() {
        let snapshot = json!({"name": "Ikhaya College"});
        assert!(diff_fields(&snapshot, &snapshot.clone()).is_none());
    }

    #[test]
    fn test_diff_added_and_removed_fields() {
        let before = json!({"phone": "011", "fax": "012"});
        let after = json!({"phone": "011", "email": "x@y.example"});

        let (b, a) = diff_fields(&before, &after).unwrap();
        assert_eq!(b, json!({"email": null, "fax": "012"}));
        assert_eq!(a, json!({"email": "x@y.example", "fax": null}));
    }

    #[test]
    fn test_diff_non_object_snapshots() {
        let before = json!("draft");
        let after = json!("submitted");
        let (b, a) = diff_fields(&before, &after).unwrap();
        assert_eq!(b, json!("draft"));
        assert_eq!(a, json!("submitted"));
        assert!(diff_fields(&json!("x"), &json!("x")).is_none());
    }
}
