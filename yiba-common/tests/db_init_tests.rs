//! Integration tests for database initialization
//!
//! Verifies idempotent schema creation, default settings, constraint
//! enforcement, and pragma configuration.

use yiba_common::db::{ensure_setting, get_setting, get_setting_i64, init_database, put_setting};

async fn temp_db() -> (tempfile::TempDir, sqlx::SqlitePool) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let pool = init_database(&dir.path().join("yiba.db"))
        .await
        .expect("init database");
    (dir, pool)
}

#[tokio::test]
async fn test_init_creates_all_tables() {
    let (_dir, pool) = temp_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
    for expected in [
        "audit_log",
        "campaigns",
        "documents",
        "email_outbox",
        "enrolments",
        "institutions",
        "invites",
        "learners",
        "notifications",
        "qualifications",
        "readiness_forms",
        "readiness_sections",
        "review_assignments",
        "reviews",
        "sessions",
        "settings",
        "submission_items",
        "submissions",
        "users",
    ] {
        assert!(names.contains(&expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("yiba.db");

    let pool = init_database(&db_path).await.unwrap();
    drop(pool);

    // Second init over the same file must succeed without error
    let pool = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(count > 0);
}

#[tokio::test]
async fn test_default_settings_seeded() {
    let (_dir, pool) = temp_db().await;

    let timeout = get_setting_i64(&pool, "session_timeout_seconds", 0)
        .await
        .unwrap();
    assert_eq!(timeout, 1_209_600);

    let batch = get_setting_i64(&pool, "campaign_batch_size", 0).await.unwrap();
    assert_eq!(batch, 25);

    // Dev-mode mail gateway default is empty
    let gateway = get_setting(&pool, "mail_gateway_url").await.unwrap();
    assert_eq!(gateway.as_deref(), Some(""));
}

#[tokio::test]
async fn test_ensure_setting_preserves_existing_value() {
    let (_dir, pool) = temp_db().await;

    put_setting(&pool, "campaign_batch_size", "99").await.unwrap();
    ensure_setting(&pool, "campaign_batch_size", "25").await.unwrap();

    let value = get_setting_i64(&pool, "campaign_batch_size", 0).await.unwrap();
    assert_eq!(value, 99);
}

#[tokio::test]
async fn test_setting_parse_failure_falls_back() {
    let (_dir, pool) = temp_db().await;

    put_setting(&pool, "campaign_batch_size", "not-a-number")
        .await
        .unwrap();
    let value = get_setting_i64(&pool, "campaign_batch_size", 7).await.unwrap();
    assert_eq!(value, 7);
}

#[tokio::test]
async fn test_foreign_keys_enforced() {
    let (_dir, pool) = temp_db().await;

    // Learner referencing a nonexistent institution must fail
    let result = sqlx::query(
        r#"
        INSERT INTO learners (id, institution_id, national_id, first_name, last_name)
        VALUES ('l1', 'missing-institution', '8001015009087', 'Thandi', 'Mokoena')
        "#,
    )
    .execute(&pool)
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_status_check_constraints() {
    let (_dir, pool) = temp_db().await;

    sqlx::query(
        "INSERT INTO institutions (id, name, contact_email) VALUES ('i1', 'Ikhaya College', 'admin@ikhaya.example')",
    )
    .execute(&pool)
    .await
    .unwrap();

    // Invalid institution status rejected by CHECK
    let result = sqlx::query("UPDATE institutions SET status = 'dormant' WHERE id = 'i1'")
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_user_role_tenancy_check() {
    let (_dir, pool) = temp_db().await;

    // Institution role without institution_id violates the pairing CHECK
    let result = sqlx::query(
        r#"
        INSERT INTO users (id, institution_id, email, display_name, role)
        VALUES ('u1', NULL, 'staff@ikhaya.example', 'Staff', 'institution_staff')
        "#,
    )
    .execute(&pool)
    .await;
    assert!(result.is_err());

    // QCTO role with an institution_id is equally invalid
    sqlx::query(
        "INSERT INTO institutions (id, name, contact_email) VALUES ('i1', 'Ikhaya College', 'admin@ikhaya.example')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let result = sqlx::query(
        r#"
        INSERT INTO users (id, institution_id, email, display_name, role)
        VALUES ('u2', 'i1', 'rev@qcto.example', 'Reviewer', 'qcto_reviewer')
        "#,
    )
    .execute(&pool)
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_learner_unique_per_institution() {
    let (_dir, pool) = temp_db().await;

    sqlx::query(
        "INSERT INTO institutions (id, name, contact_email) VALUES ('i1', 'Ikhaya College', 'admin@ikhaya.example')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO institutions (id, name, contact_email) VALUES ('i2', 'Vista Academy', 'admin@vista.example')",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO learners (id, institution_id, national_id, first_name, last_name) VALUES ('l1', 'i1', '8001015009087', 'Thandi', 'Mokoena')",
    )
    .execute(&pool)
    .await
    .unwrap();

    // Same national_id at the same institution: rejected
    let dup = sqlx::query(
        "INSERT INTO learners (id, institution_id, national_id, first_name, last_name) VALUES ('l2', 'i1', '8001015009087', 'T', 'M')",
    )
    .execute(&pool)
    .await;
    assert!(dup.is_err());

    // Same national_id at a different institution: allowed
    sqlx::query(
        "INSERT INTO learners (id, institution_id, national_id, first_name, last_name) VALUES ('l3', 'i2', '8001015009087', 'Thandi', 'Mokoena')",
    )
    .execute(&pool)
    .await
    .unwrap();
}
