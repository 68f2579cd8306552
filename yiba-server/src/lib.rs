//! yiba-server library - Yiba Verified compliance API
//!
//! Multi-tenant API for institutional onboarding, learner and enrolment
//! records, readiness (Form 5) workflows, evidence documents, submission
//! review pipelines, audit logging and notifications.

use axum::Router;
use governor::{Quota, RateLimiter};
use sqlx::SqlitePool;
use std::num::NonZeroU32;
use std::sync::Arc;
use yiba_common::events::EventBus;

use crate::services::storage::DocumentStore;

pub mod api;
pub mod db;
pub mod error;
pub mod pagination;
pub mod services;

/// Keyed rate limiter for login attempts (keyed by email)
pub type LoginLimiter = governor::DefaultKeyedRateLimiter<String>;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus feeding SSE and the notifier
    pub events: EventBus,
    /// Blob storage for evidence documents
    pub store: Arc<dyn DocumentStore>,
    /// Per-account login attempt limiter
    pub login_limiter: Arc<LoginLimiter>,
}

impl AppState {
    /// Create application state
    ///
    /// `login_attempts_per_minute` comes from the settings table at
    /// startup; changing it requires a restart (the limiter is keyed
    /// state, not a per-request read).
    pub fn new(
        db: SqlitePool,
        events: EventBus,
        store: Arc<dyn DocumentStore>,
        login_attempts_per_minute: u32,
    ) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(login_attempts_per_minute.clamp(1, 1000))
                .unwrap_or(NonZeroU32::new(5).unwrap()),
        );
        Self {
            db,
            events,
            store,
            login_limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }
}

/// Build application router
///
/// Health and the credential endpoints are public; everything else sits
/// behind the session middleware.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{delete, get, post, put};

    let protected = Router::new()
        // Session
        .route("/api/auth/logout", post(api::auth::logout))
        .route("/api/auth/me", get(api::auth::me))
        // Institutions
        .route("/api/institutions", post(api::institutions::create_institution))
        .route("/api/institutions", get(api::institutions::list_institutions))
        .route("/api/institutions/:id", get(api::institutions::get_institution))
        .route("/api/institutions/:id", put(api::institutions::update_institution))
        .route("/api/institutions/:id/status", put(api::institutions::set_institution_status))
        // Users & invites
        .route("/api/users", post(api::users::invite_user))
        .route("/api/users", get(api::users::list_users))
        .route("/api/users/:id/active", put(api::users::set_user_active))
        // Qualifications
        .route("/api/qualifications", post(api::qualifications::create_qualification))
        .route("/api/qualifications", get(api::qualifications::list_qualifications))
        .route("/api/qualifications/:id", put(api::qualifications::update_qualification))
        // Learners
        .route("/api/learners", post(api::learners::create_learner))
        .route("/api/learners", get(api::learners::list_learners))
        .route("/api/learners/:id", get(api::learners::get_learner))
        .route("/api/learners/:id", put(api::learners::update_learner))
        .route("/api/learners/:id", delete(api::learners::delete_learner))
        // Enrolments
        .route("/api/enrolments", post(api::enrolments::create_enrolment))
        .route("/api/enrolments", get(api::enrolments::list_enrolments))
        .route("/api/enrolments/:id/status", put(api::enrolments::set_enrolment_status))
        // Readiness forms
        .route("/api/readiness", post(api::readiness::create_form))
        .route("/api/readiness", get(api::readiness::list_forms))
        .route("/api/readiness/:id", get(api::readiness::get_form))
        .route("/api/readiness/:id/sections/:key", put(api::readiness::upsert_section))
        .route("/api/readiness/:id/submit", post(api::readiness::submit_form))
        .route("/api/readiness/:id/decision", post(api::readiness::decide_form))
        // Documents
        .route("/api/documents", post(api::documents::upload_document))
        .route("/api/documents", get(api::documents::list_documents))
        .route("/api/documents/:id", get(api::documents::get_document))
        .route("/api/documents/:id/download", get(api::documents::download_document))
        .route("/api/documents/:id", delete(api::documents::delete_document))
        // Submissions
        .route("/api/submissions", post(api::submissions::create_submission))
        .route("/api/submissions", get(api::submissions::list_submissions))
        .route("/api/submissions/:id", get(api::submissions::get_submission))
        .route("/api/submissions/:id/items", post(api::submissions::add_item))
        .route("/api/submissions/:id/items/:document_id", delete(api::submissions::remove_item))
        .route("/api/submissions/:id/submit", post(api::submissions::submit_submission))
        // Reviews
        .route("/api/submissions/:id/assignments", get(api::reviews::list_assignments))
        .route("/api/submissions/:id/assignments", post(api::reviews::assign_reviewer))
        .route("/api/submissions/:id/assignments/:reviewer_id", delete(api::reviews::unassign_reviewer))
        .route("/api/submissions/:id/reviews", get(api::reviews::list_reviews))
        .route("/api/submissions/:id/reviews", post(api::reviews::record_review))
        // Audit log
        .route("/api/audit", get(api::audit::query_audit_log))
        // Notifications
        .route("/api/notifications", get(api::notifications::list_notifications))
        .route("/api/notifications/unread-count", get(api::notifications::unread_count))
        .route("/api/notifications/:id/read", post(api::notifications::mark_read))
        // Campaigns
        .route("/api/campaigns", post(api::campaigns::create_campaign))
        .route("/api/campaigns/:id", get(api::campaigns::get_campaign))
        // Exports
        .route("/api/exports/learners.csv", get(api::exports::export_learners_csv))
        .route("/api/exports/enrolments.csv", get(api::exports::export_enrolments_csv))
        .route("/api/exports/audit.csv", get(api::exports::export_audit_csv))
        .route("/api/exports/readiness/:id", get(api::exports::export_readiness_json))
        // Dashboard
        .route("/api/dashboard", get(api::dashboard::get_dashboard))
        // Settings
        .route("/api/settings", get(api::settings::list_settings))
        .route("/api/settings/:key", put(api::settings::put_setting))
        // Events
        .route("/api/events", get(api::sse::event_stream))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::session_middleware,
        ));

    // Public routes (no authentication)
    let public = Router::new()
        .route("/api/auth/login", post(api::auth::login))
        .route("/api/auth/accept-invite", post(api::auth::accept_invite))
        .merge(api::health::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        // Default axum limit is 2 MB; uploads go up to document_max_size_bytes
        .layer(axum::extract::DefaultBodyLimit::max(27_262_976))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
