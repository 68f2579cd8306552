//! yiba-server - Yiba Verified compliance API service

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use yiba_common::config::{database_path, documents_path, ensure_root_folder, resolve_root_folder};
use yiba_common::db::settings::get_setting_i64;
use yiba_common::events::EventBus;
use yiba_common::Role;
use yiba_server::services::storage::LocalDocumentStore;
use yiba_server::services::{campaign, notifier};
use yiba_server::{build_router, AppState};

#[derive(Debug, Parser)]
#[command(name = "yiba-server", about = "Yiba Verified compliance API")]
struct Args {
    /// Root folder holding the database and document store
    #[arg(long)]
    root_folder: Option<String>,

    /// Bind address
    #[arg(long, env = "YIBA_BIND", default_value = "127.0.0.1:5780")]
    bind: String,

    /// Bootstrap platform admin email (used only when no users exist)
    #[arg(long, env = "YIBA_BOOTSTRAP_ADMIN_EMAIL")]
    bootstrap_admin_email: Option<String>,

    /// Bootstrap platform admin password
    #[arg(long, env = "YIBA_BOOTSTRAP_ADMIN_PASSWORD")]
    bootstrap_admin_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Log build identification immediately after tracing init
    info!(
        "Starting Yiba Verified (yiba-server) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), "YIBA_ROOT_FOLDER");
    ensure_root_folder(&root_folder)?;
    info!("Root folder: {}", root_folder.display());

    let db_path = database_path(&root_folder);
    let pool = yiba_common::db::init_database(&db_path).await?;
    info!("✓ Database ready at {}", db_path.display());

    bootstrap_admin(
        &pool,
        args.bootstrap_admin_email.as_deref(),
        args.bootstrap_admin_password.as_deref(),
    )
    .await?;

    let purged = yiba_server::db::sessions::purge_expired_sessions(&pool).await?;
    if purged > 0 {
        info!("Purged {} expired session(s)", purged);
    }

    let events = EventBus::new(1000);
    let store = Arc::new(LocalDocumentStore::new(documents_path(&root_folder)));

    // Background services
    notifier::spawn_notifier(pool.clone(), events.clone());
    campaign::spawn_dispatch_worker(pool.clone(), events.clone());

    let login_rate = get_setting_i64(&pool, "login_attempts_per_minute", 5).await?;
    let state = AppState::new(pool, events, store, login_rate as u32);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!("yiba-server listening on http://{}", args.bind);
    info!("Health check: http://{}/health", args.bind);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the first platform admin when the users table is empty
async fn bootstrap_admin(
    pool: &sqlx::SqlitePool,
    email: Option<&str>,
    password: Option<&str>,
) -> Result<()> {
    if !yiba_server::db::users::is_empty(pool).await? {
        return Ok(());
    }

    let (email, password) = match (email, password) {
        (Some(email), Some(password)) => (email, password),
        _ => {
            warn!("No users exist and no bootstrap admin configured; set YIBA_BOOTSTRAP_ADMIN_EMAIL / YIBA_BOOTSTRAP_ADMIN_PASSWORD");
            return Ok(());
        }
    };

    let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
    let admin = yiba_common::db::models::User {
        id: Uuid::new_v4(),
        institution_id: None,
        email: email.trim().to_lowercase(),
        display_name: "Platform Admin".to_string(),
        password_hash,
        role: Role::PlatformAdmin,
        active: true,
    };
    yiba_server::db::users::insert(pool, &admin).await?;
    info!("✓ Bootstrap platform admin created: {}", admin.email);

    Ok(())
}
