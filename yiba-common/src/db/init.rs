//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to
//! date idempotently. Every `create_*_table` uses CREATE TABLE IF NOT
//! EXISTS with CHECK constraints, so init is safe to run on every start.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_pragmas(&pool).await?;
    create_all_tables(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests
pub async fn init_test_database() -> Result<SqlitePool> {
    // A single persistent connection: in-memory databases exist per
    // connection, so the pool must never drop and redial
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    configure_pragmas(&pool).await?;
    create_all_tables(&pool).await?;
    init_default_settings(&pool).await?;
    Ok(pool)
}

async fn configure_pragmas(pool: &SqlitePool) -> Result<()> {
    // Enforce referential integrity
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    // Wait on locks instead of failing immediately
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    Ok(())
}

async fn create_all_tables(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_institutions_table(pool).await?;
    create_users_table(pool).await?;
    create_sessions_table(pool).await?;
    create_invites_table(pool).await?;
    create_qualifications_table(pool).await?;
    create_learners_table(pool).await?;
    create_enrolments_table(pool).await?;
    create_readiness_tables(pool).await?;
    create_documents_table(pool).await?;
    create_submissions_tables(pool).await?;
    create_reviews_tables(pool).await?;
    create_audit_log_table(pool).await?;
    create_notifications_table(pool).await?;
    create_campaigns_table(pool).await?;
    create_email_outbox_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_institutions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS institutions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            trading_name TEXT,
            sdl_number TEXT,
            contact_email TEXT NOT NULL,
            phone TEXT,
            province TEXT,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'active', 'suspended')),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_institutions_status ON institutions(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_institutions_name ON institutions(name)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the users table
///
/// Institution roles must carry an institution_id; regulator and platform
/// roles must not. The CHECK encodes that pairing.
pub async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            institution_id TEXT REFERENCES institutions(id) ON DELETE CASCADE,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            password_hash TEXT NOT NULL DEFAULT '',
            role TEXT NOT NULL CHECK (role IN ('platform_admin', 'qcto_admin', 'qcto_reviewer', 'institution_admin', 'institution_staff')),
            active INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (
                (role IN ('institution_admin', 'institution_staff') AND institution_id IS NOT NULL)
                OR (role NOT IN ('institution_admin', 'institution_staff') AND institution_id IS NULL)
            )
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_institution ON users(institution_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token_digest TEXT PRIMARY KEY CHECK (length(token_digest) = 64),
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_invites_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invites (
            token_digest TEXT PRIMARY KEY CHECK (length(token_digest) = 64),
            email TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('platform_admin', 'qcto_admin', 'qcto_reviewer', 'institution_admin', 'institution_staff')),
            institution_id TEXT REFERENCES institutions(id) ON DELETE CASCADE,
            invited_by TEXT NOT NULL REFERENCES users(id),
            campaign_id TEXT,
            expires_at TEXT NOT NULL,
            accepted_at TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_invites_email ON invites(email)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_qualifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qualifications (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            nqf_level INTEGER NOT NULL CHECK (nqf_level >= 1 AND nqf_level <= 10),
            curriculum_code TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_qualifications_code ON qualifications(code)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the learners table
///
/// national_id is unique per institution, not globally: the same person
/// may be registered at two institutions.
pub async fn create_learners_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS learners (
            id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL REFERENCES institutions(id) ON DELETE CASCADE,
            national_id TEXT NOT NULL CHECK (length(national_id) = 13),
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            gender TEXT CHECK (gender IS NULL OR gender IN ('female', 'male', 'other')),
            birth_date TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (institution_id, national_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_learners_institution ON learners(institution_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_learners_national_id ON learners(national_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_enrolments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrolments (
            id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL REFERENCES institutions(id) ON DELETE CASCADE,
            learner_id TEXT NOT NULL REFERENCES learners(id) ON DELETE CASCADE,
            qualification_id TEXT NOT NULL REFERENCES qualifications(id),
            status TEXT NOT NULL DEFAULT 'registered' CHECK (status IN ('registered', 'active', 'completed', 'withdrawn')),
            enrolled_on TEXT NOT NULL,
            completed_on TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (learner_id, qualification_id),
            CHECK (status != 'completed' OR completed_on IS NOT NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_enrolments_institution ON enrolments(institution_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_enrolments_learner ON enrolments(learner_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_enrolments_status ON enrolments(status)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create readiness form and section tables
///
/// One form per (institution, qualification). Sections are fixed keys,
/// one row each, created alongside the form.
pub async fn create_readiness_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readiness_forms (
            id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL REFERENCES institutions(id) ON DELETE CASCADE,
            qualification_id TEXT NOT NULL REFERENCES qualifications(id),
            status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'in_progress', 'submitted', 'under_review', 'approved', 'rejected', 'returned')),
            submitted_at TEXT,
            decided_at TEXT,
            decision_comment TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (institution_id, qualification_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readiness_sections (
            form_id TEXT NOT NULL REFERENCES readiness_forms(id) ON DELETE CASCADE,
            section_key TEXT NOT NULL CHECK (section_key IN ('governance', 'finance', 'facilities', 'staffing', 'learning_material', 'assessment', 'workplace_component')),
            payload TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'incomplete' CHECK (status IN ('incomplete', 'complete')),
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (form_id, section_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_readiness_institution ON readiness_forms(institution_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_readiness_status ON readiness_forms(status)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the documents table
///
/// sha256 is unique per institution: re-uploading identical bytes yields
/// the existing row instead of a duplicate blob.
pub async fn create_documents_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL REFERENCES institutions(id) ON DELETE CASCADE,
            owner_user_id TEXT NOT NULL REFERENCES users(id),
            file_name TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
            sha256 TEXT NOT NULL CHECK (length(sha256) = 64),
            storage_key TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'evidence' CHECK (kind IN ('evidence', 'policy', 'identity', 'other')),
            readiness_form_id TEXT REFERENCES readiness_forms(id) ON DELETE SET NULL,
            readiness_section_key TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (institution_id, sha256)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_institution ON documents(institution_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_sha256 ON documents(sha256)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_submissions_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL REFERENCES institutions(id) ON DELETE CASCADE,
            readiness_form_id TEXT REFERENCES readiness_forms(id) ON DELETE SET NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'submitted', 'under_review', 'returned', 'accepted', 'declined')),
            submitted_at TEXT,
            decided_at TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submission_items (
            submission_id TEXT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            added_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (submission_id, document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_submissions_institution ON submissions(institution_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_reviews_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_assignments (
            id TEXT PRIMARY KEY,
            submission_id TEXT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
            reviewer_id TEXT NOT NULL REFERENCES users(id),
            assigned_by TEXT NOT NULL REFERENCES users(id),
            active INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One live assignment per reviewer per submission
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_unique_active ON review_assignments(submission_id, reviewer_id) WHERE active = 1",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reviews (
            id TEXT PRIMARY KEY,
            submission_id TEXT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
            reviewer_id TEXT NOT NULL REFERENCES users(id),
            outcome TEXT NOT NULL CHECK (outcome IN ('accept', 'decline', 'return')),
            comment TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reviews_submission ON reviews(submission_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the audit_log table
///
/// Flat append table; rows are written in the same transaction as the
/// mutation they describe. before_json/after_json hold only changed fields.
pub async fn create_audit_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            actor_id TEXT NOT NULL,
            institution_id TEXT,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            action TEXT NOT NULL CHECK (action IN ('create', 'update', 'delete', 'transition')),
            before_json TEXT,
            after_json TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity_type, entity_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_log(actor_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_log(created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_institution ON audit_log(institution_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_notifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            read INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, read)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_campaigns_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK (kind IN ('institution_invite', 'user_invite')),
            institution_id TEXT REFERENCES institutions(id) ON DELETE CASCADE,
            created_by TEXT NOT NULL REFERENCES users(id),
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'running', 'complete')),
            total INTEGER NOT NULL DEFAULT 0,
            sent INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_email_outbox_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_outbox (
            id TEXT PRIMARY KEY,
            campaign_id TEXT REFERENCES campaigns(id) ON DELETE SET NULL,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued' CHECK (status IN ('queued', 'sent', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            queued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            sent_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_status ON email_outbox(status, queued_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all required settings exist with default values. NULL values
/// are reset to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Session and authentication settings
    ensure_setting(pool, "session_timeout_seconds", "1209600").await?; // 14 days
    ensure_setting(pool, "invite_expiry_seconds", "604800").await?; // 7 days
    ensure_setting(pool, "login_attempts_per_minute", "5").await?;

    // Document storage settings
    ensure_setting(pool, "document_max_size_bytes", "26214400").await?; // 25 MB

    // Campaign / outbox dispatch settings
    ensure_setting(pool, "campaign_batch_size", "25").await?;
    ensure_setting(pool, "campaign_batch_delay_ms", "2000").await?;
    ensure_setting(pool, "campaign_batch_jitter_ms", "500").await?;
    ensure_setting(pool, "campaign_max_attempts", "3").await?;
    ensure_setting(pool, "campaign_rate_per_minute", "60").await?;
    ensure_setting(pool, "outbox_poll_interval_ms", "1000").await?;

    // Mail gateway settings (empty url = dev mode, mail logged not sent)
    ensure_setting(pool, "mail_gateway_url", "").await?;
    ensure_setting(pool, "mail_from_address", "no-reply@yibaverified.example").await?;

    // HTTP server settings
    ensure_setting(pool, "http_max_body_size_bytes", "27262976").await?; // 26 MB

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization races
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}
