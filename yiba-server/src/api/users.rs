//! User management and invites

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::auth::{generate_token, token_digest};
use yiba_common::api::types::{AuthUser, UserProfile};
use yiba_common::db::settings::get_setting_i64;
use yiba_common::{Capability, Role};

use super::require_cap;
use crate::db::{institutions, outbox, sessions, users};
use crate::error::{ApiError, ApiResult};
use crate::services::templates;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InviteUserRequest {
    pub email: String,
    pub role: String,
    /// Required for institution roles, forbidden otherwise (institution
    /// admins may omit it; their own institution is implied)
    pub institution_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct InviteUserResponse {
    pub email: String,
    pub role: Role,
    pub institution_id: Option<Uuid>,
    pub expires_at: String,
    /// One-time invite token. Returned to the caller in addition to the
    /// invite email so onboarding can proceed when mail is delayed.
    pub invite_token: String,
}

/// POST /api/users
///
/// Creates an invite; the account itself is created when the invite is
/// accepted.
pub async fn invite_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<InviteUserRequest>,
) -> ApiResult<Json<InviteUserResponse>> {
    require_cap(&auth, Capability::UserManage)?;

    let email = request.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::BadRequest("email is invalid".to_string()));
    }
    let role = Role::parse(&request.role)
        .map_err(|_| ApiError::BadRequest(format!("Unknown role: {}", request.role)))?;

    // Institution admins may only invite staff/admins into their own
    // institution
    let institution_id = match auth.role {
        Role::InstitutionAdmin => {
            if !role.is_institution_role() {
                return Err(ApiError::Forbidden(
                    "Institution admins may only invite institution roles".to_string(),
                ));
            }
            auth.institution_id
        }
        _ => {
            if role.is_institution_role() {
                let id = request.institution_id.ok_or_else(|| {
                    ApiError::BadRequest("institution_id is required for institution roles".to_string())
                })?;
                institutions::find_by_id(&state.db, id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("Institution {}", id)))?;
                Some(id)
            } else {
                if request.institution_id.is_some() {
                    return Err(ApiError::BadRequest(
                        "institution_id is not allowed for this role".to_string(),
                    ));
                }
                None
            }
        }
    };

    if users::find_by_email(&state.db, &email).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "A user with email {} already exists",
            email
        )));
    }

    let expiry_seconds = get_setting_i64(&state.db, "invite_expiry_seconds", 604_800).await?;
    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(expiry_seconds);

    let token = generate_token();
    let invite = sessions::Invite {
        email: email.clone(),
        role,
        institution_id,
        invited_by: auth.user_id,
        expires_at,
        accepted_at: None,
    };
    sessions::create_invite(&state.db, &token_digest(&token), &invite, None).await?;

    // Queue the invite email
    let institution_line = match institution_id {
        Some(id) => {
            let name = institutions::find_by_id(&state.db, id)
                .await?
                .map(|i| i.name)
                .unwrap_or_else(|| id.to_string());
            format!(" at {}", name)
        }
        None => String::new(),
    };
    let body = templates::render(
        templates::INVITE_TEMPLATE,
        &[
            ("name", &email),
            ("role", role.as_str()),
            ("institution_line", &institution_line),
            ("accept_url", &format!("/accept-invite?token={}", token)),
            ("expires_at", &expires_at.to_rfc3339()),
        ],
    );
    outbox::queue_email(&state.db, None, &email, templates::INVITE_SUBJECT, &body).await?;

    Ok(Json(InviteUserResponse {
        email,
        role,
        institution_id,
        expires_at: expires_at.to_rfc3339(),
        invite_token: token,
    }))
}

/// GET /api/users
///
/// Platform and QCTO admins see all users; institution admins see their
/// own institution's users.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<UserProfile>>> {
    require_cap(&auth, Capability::UserManage)?;

    let users = users::list(&state.db, auth.institution_id).await?;
    let profiles = users
        .into_iter()
        .map(|user| {
            UserProfile {
                id: user.id,
                institution_id: user.institution_id,
                email: user.email,
                display_name: user.display_name,
                role: user.role,
                active: user.active,
                capabilities: Vec::new(),
            }
            .with_capabilities()
        })
        .collect();
    Ok(Json(profiles))
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// PUT /api/users/:id/active
pub async fn set_user_active(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetActiveRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::UserManage)?;

    if id == auth.user_id {
        return Err(ApiError::Conflict(
            "Cannot change your own active state".to_string(),
        ));
    }

    let target = users::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {}", id)))?;

    // Institution admins stay inside their own institution
    if let Some(own) = auth.institution_id {
        if target.institution_id != Some(own) {
            return Err(ApiError::Forbidden(
                "Cannot manage users of another institution".to_string(),
            ));
        }
    }

    users::set_active(&state.db, id, request.active).await?;
    Ok(Json(serde_json::json!({ "id": id, "active": request.active })))
}
