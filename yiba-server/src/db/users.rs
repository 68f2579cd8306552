//! User database operations

use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use yiba_common::db::models::User;
use yiba_common::{Result, Role};

use super::audit::parse_uuid;

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    Ok(User {
        id: parse_uuid(row.get("id"))?,
        institution_id: row
            .get::<Option<String>, _>("institution_id")
            .map(parse_uuid)
            .transpose()?,
        email: row.get("email"),
        display_name: row.get("display_name"),
        password_hash: row.get("password_hash"),
        role: Role::parse(&row.get::<String, _>("role"))?,
        active: row.get::<i64, _>("active") != 0,
    })
}

const USER_COLUMNS: &str = "id, institution_id, email, display_name, password_hash, role, active";

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM users WHERE email = ?",
        USER_COLUMNS
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(user_from_row).transpose()
}

/// Insert a user row
pub async fn insert(pool: &SqlitePool, user: &User) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (id, institution_id, email, display_name, password_hash, role, active)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.id.to_string())
    .bind(user.institution_id.map(|id| id.to_string()))
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(&user.password_hash)
    .bind(user.role.as_str())
    .bind(user.active as i64)
    .execute(pool)
    .await?;

    Ok(())
}

/// Set a user's password hash (invite acceptance, password change)
pub async fn set_password_hash(pool: &SqlitePool, user_id: Uuid, hash: &str) -> Result<()> {
    sqlx::query(
        "UPDATE users SET password_hash = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(hash)
    .bind(user_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Activate or deactivate a user
pub async fn set_active(pool: &SqlitePool, user_id: Uuid, active: bool) -> Result<()> {
    let result = sqlx::query(
        "UPDATE users SET active = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(active as i64)
    .bind(user_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(yiba_common::Error::NotFound(format!("User {}", user_id)));
    }
    Ok(())
}

/// List users, optionally restricted to one institution
pub async fn list(pool: &SqlitePool, institution_id: Option<Uuid>) -> Result<Vec<User>> {
    let rows = match institution_id {
        Some(id) => {
            sqlx::query(&format!(
                "SELECT {} FROM users WHERE institution_id = ? ORDER BY email",
                USER_COLUMNS
            ))
            .bind(id.to_string())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!("SELECT {} FROM users ORDER BY email", USER_COLUMNS))
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter().map(user_from_row).collect()
}

/// List active users of one role (notifier fan-out targets)
pub async fn list_by_role(pool: &SqlitePool, role: Role) -> Result<Vec<User>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM users WHERE role = ? AND active = 1",
        USER_COLUMNS
    ))
    .bind(role.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(user_from_row).collect()
}

/// List active institution admins for one institution
pub async fn list_institution_admins(pool: &SqlitePool, institution_id: Uuid) -> Result<Vec<User>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM users WHERE institution_id = ? AND role = 'institution_admin' AND active = 1",
        USER_COLUMNS
    ))
    .bind(institution_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(user_from_row).collect()
}

/// True when no users exist yet (bootstrap check)
pub async fn is_empty(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(count == 0)
}
