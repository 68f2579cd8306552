//! Authentication endpoints and session middleware
//!
//! Bearer session tokens: the middleware resolves the token digest to a
//! user and injects AuthUser into request extensions. Login attempts are
//! rate limited per account.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::auth::{check_expiry, check_token_shape, generate_token, token_digest};
use yiba_common::api::types::{AuthUser, UserProfile};
use yiba_common::db::models::User;
use yiba_common::db::settings::get_setting_i64;
use yiba_common::events::YibaEvent;

use crate::db::{sessions, users};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Digest of the caller's session token, for logout
#[derive(Debug, Clone)]
pub struct SessionDigest(pub String);

fn bearer_token(request: &Request) -> Result<String, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .map(|t| t.to_string())
        .ok_or_else(|| ApiError::Unauthorized("Expected Bearer token".to_string()))
}

/// Session middleware
///
/// Validates the bearer token, purges the session row when expired, and
/// injects AuthUser + SessionDigest for downstream handlers.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request)?;
    check_token_shape(&token).map_err(|_| ApiError::Unauthorized("Malformed token".to_string()))?;

    let digest = token_digest(&token);
    let (user_id, expires_at) = sessions::find_session(&state.db, &digest)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown session".to_string()))?;

    if check_expiry(expires_at, chrono::Utc::now()).is_err() {
        sessions::delete_session(&state.db, &digest).await?;
        return Err(ApiError::Unauthorized("Session expired".to_string()));
    }

    let user = users::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;
    if !user.active {
        return Err(ApiError::Unauthorized("Account is deactivated".to_string()));
    }

    request.extensions_mut().insert(AuthUser {
        user_id: user.id,
        institution_id: user.institution_id,
        role: user.role,
    });
    request.extensions_mut().insert(SessionDigest(digest));

    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

fn profile(user: &User) -> UserProfile {
    UserProfile {
        id: user.id,
        institution_id: user.institution_id,
        email: user.email.clone(),
        display_name: user.display_name.clone(),
        role: user.role,
        active: user.active,
        capabilities: Vec::new(),
    }
    .with_capabilities()
}

async fn issue_session(state: &AppState, user_id: Uuid) -> ApiResult<String> {
    let timeout_seconds = get_setting_i64(&state.db, "session_timeout_seconds", 1_209_600).await?;
    let token = generate_token();
    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(timeout_seconds);
    sessions::create_session(&state.db, &token_digest(&token), user_id, expires_at).await?;
    Ok(token)
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let email = request.email.trim().to_lowercase();

    // Per-account attempt cap; a limited account gets 429 before any
    // credential work happens
    if state.login_limiter.check_key(&email).is_err() {
        return Err(ApiError::RateLimited(
            "Too many login attempts, try again later".to_string(),
        ));
    }

    let user = users::find_by_email(&state.db, &email).await?;

    // Same error for unknown account and wrong password
    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());
    let user = user.ok_or_else(invalid)?;

    if user.password_hash.is_empty() {
        // Invited but never activated
        return Err(invalid());
    }
    let verified = bcrypt::verify(&request.password, &user.password_hash)
        .map_err(|e| ApiError::Internal(format!("Password verification failed: {}", e)))?;
    if !verified {
        return Err(invalid());
    }
    if !user.active {
        return Err(ApiError::Unauthorized("Account is deactivated".to_string()));
    }

    let token = issue_session(&state, user.id).await?;

    Ok(Json(LoginResponse {
        token,
        user: profile(&user),
    }))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(digest): Extension<SessionDigest>,
) -> ApiResult<Json<serde_json::Value>> {
    sessions::delete_session(&state.db, &digest.0).await?;
    Ok(Json(serde_json::json!({ "logged_out": true })))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<UserProfile>> {
    let user = users::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;
    Ok(Json(profile(&user)))
}

#[derive(Debug, Deserialize)]
pub struct AcceptInviteRequest {
    pub token: String,
    pub display_name: String,
    pub password: String,
}

/// POST /api/auth/accept-invite
///
/// Exchanges a one-time invite token for an activated account and a
/// first session.
pub async fn accept_invite(
    State(state): State<AppState>,
    Json(request): Json<AcceptInviteRequest>,
) -> ApiResult<Json<LoginResponse>> {
    if request.password.len() < 10 {
        return Err(ApiError::BadRequest(
            "Password must be at least 10 characters".to_string(),
        ));
    }
    if request.display_name.trim().is_empty() {
        return Err(ApiError::BadRequest("display_name is required".to_string()));
    }

    check_token_shape(&request.token)
        .map_err(|_| ApiError::BadRequest("Malformed invite token".to_string()))?;
    let digest = token_digest(&request.token);

    let invite = sessions::find_invite(&state.db, &digest)
        .await?
        .ok_or_else(|| ApiError::NotFound("Unknown invite".to_string()))?;

    if invite.accepted_at.is_some() {
        return Err(ApiError::Conflict("Invite already accepted".to_string()));
    }
    if check_expiry(invite.expires_at, chrono::Utc::now()).is_err() {
        return Err(ApiError::Conflict("Invite expired".to_string()));
    }
    if users::find_by_email(&state.db, &invite.email).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "A user with email {} already exists",
            invite.email
        )));
    }

    let password_hash = bcrypt::hash(&request.password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::Internal(format!("Password hashing failed: {}", e)))?;

    let user = User {
        id: Uuid::new_v4(),
        institution_id: invite.institution_id,
        email: invite.email.clone(),
        display_name: request.display_name.trim().to_string(),
        password_hash,
        role: invite.role,
        active: true,
    };
    users::insert(&state.db, &user).await?;
    sessions::mark_invite_accepted(&state.db, &digest).await?;

    state.events.emit(YibaEvent::InviteAccepted {
        user_id: user.id,
        institution_id: user.institution_id,
        timestamp: chrono::Utc::now(),
    });

    let token = issue_session(&state, user.id).await?;

    Ok(Json(LoginResponse {
        token,
        user: profile(&user),
    }))
}
