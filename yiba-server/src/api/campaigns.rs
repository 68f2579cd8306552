//! Invite campaign endpoints
//!
//! A campaign fans one invite out per recipient into the email outbox;
//! the dispatch worker paces actual delivery.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::auth::{generate_token, token_digest};
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::Campaign;
use yiba_common::db::settings::get_setting_i64;
use yiba_common::{Capability, Role};

use super::require_cap;
use crate::db::{institutions, outbox, sessions, users};
use crate::error::{ApiError, ApiResult};
use crate::services::templates;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    /// institution_invite or user_invite
    pub kind: String,
    /// Target institution for institution-scoped invites
    pub institution_id: Option<Uuid>,
    /// Invited role (applies to every recipient)
    pub role: String,
    pub recipients: Vec<String>,
}

/// POST /api/campaigns
pub async fn create_campaign(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateCampaignRequest>,
) -> ApiResult<Json<Campaign>> {
    require_cap(&auth, Capability::CampaignManage)?;

    if !["institution_invite", "user_invite"].contains(&request.kind.as_str()) {
        return Err(ApiError::BadRequest(format!("Unknown campaign kind: {}", request.kind)));
    }
    if request.recipients.is_empty() {
        return Err(ApiError::BadRequest("recipients must not be empty".to_string()));
    }

    let role = Role::parse(&request.role)
        .map_err(|_| ApiError::BadRequest(format!("Unknown role: {}", request.role)))?;

    let (institution_id, institution_line) = if role.is_institution_role() {
        let id = request.institution_id.ok_or_else(|| {
            ApiError::BadRequest("institution_id is required for institution roles".to_string())
        })?;
        let institution = institutions::find_by_id(&state.db, id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Institution {}", id)))?;
        (Some(id), format!(" at {}", institution.name))
    } else {
        if request.institution_id.is_some() {
            return Err(ApiError::BadRequest(
                "institution_id is not allowed for this role".to_string(),
            ));
        }
        (None, String::new())
    };

    let mut recipients = Vec::new();
    for raw in &request.recipients {
        let email = raw.trim().to_lowercase();
        if !email.contains('@') {
            return Err(ApiError::BadRequest(format!("Invalid recipient: {}", raw)));
        }
        if users::find_by_email(&state.db, &email).await?.is_some() {
            return Err(ApiError::Conflict(format!(
                "A user with email {} already exists",
                email
            )));
        }
        if !recipients.contains(&email) {
            recipients.push(email);
        }
    }

    let campaign = outbox::create_campaign(
        &state.db,
        &request.kind,
        institution_id,
        auth.user_id,
        recipients.len() as i64,
    )
    .await?;

    let expiry_seconds = get_setting_i64(&state.db, "invite_expiry_seconds", 604_800).await?;
    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(expiry_seconds);

    for email in &recipients {
        let token = generate_token();
        let invite = sessions::Invite {
            email: email.clone(),
            role,
            institution_id,
            invited_by: auth.user_id,
            expires_at,
            accepted_at: None,
        };
        sessions::create_invite(&state.db, &token_digest(&token), &invite, Some(campaign.id))
            .await?;

        let body = templates::render(
            templates::INVITE_TEMPLATE,
            &[
                ("name", email),
                ("role", role.as_str()),
                ("institution_line", &institution_line),
                ("accept_url", &format!("/accept-invite?token={}", token)),
                ("expires_at", &expires_at.to_rfc3339()),
            ],
        );
        outbox::queue_email(
            &state.db,
            Some(campaign.id),
            email,
            templates::INVITE_SUBJECT,
            &body,
        )
        .await?;
    }

    let refreshed = outbox::refresh_campaign_progress(&state.db, campaign.id).await?;
    Ok(Json(refreshed))
}

#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    #[serde(flatten)]
    pub campaign: Campaign,
}

/// GET /api/campaigns/:id
pub async fn get_campaign(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CampaignResponse>> {
    require_cap(&auth, Capability::CampaignManage)?;

    let campaign = outbox::find_campaign(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Campaign {}", id)))?;
    Ok(Json(CampaignResponse { campaign }))
}
