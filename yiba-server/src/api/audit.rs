//! Audit log query endpoint

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::AuditEntry;
use yiba_common::Capability;

use super::require_cap;
use crate::db::audit::{self, AuditFilter};
use crate::error::{ApiError, ApiResult};
use crate::pagination::PAGE_SIZE;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub institution_id: Option<Uuid>,
    pub from: Option<String>,
    pub to: Option<String>,
}

fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub entries: Vec<AuditEntry>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

pub(crate) fn build_filter(auth: &AuthUser, query_institution: Option<Uuid>, query: AuditFilter) -> Result<AuditFilter, ApiError> {
    // Institution users are pinned to their own rows regardless of the
    // requested filter
    let institution_id = match auth.institution_id {
        Some(own) => {
            if matches!(query_institution, Some(requested) if requested != own) {
                return Err(ApiError::Forbidden(
                    "Cannot read another institution's audit log".to_string(),
                ));
            }
            Some(own)
        }
        None => query_institution,
    };
    Ok(AuditFilter {
        institution_id,
        ..query
    })
}

/// GET /api/audit
pub async fn query_audit_log(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<AuditResponse>> {
    require_cap(&auth, Capability::AuditRead)?;

    if let Some(action) = &query.action {
        if !["create", "update", "delete", "transition"].contains(&action.as_str()) {
            return Err(ApiError::BadRequest(format!("Unknown action: {}", action)));
        }
    }

    let filter = build_filter(
        &auth,
        query.institution_id,
        AuditFilter {
            entity_type: query.entity_type,
            entity_id: query.entity_id,
            actor_id: query.actor_id,
            action: query.action,
            institution_id: None,
            from: query.from,
            to: query.to,
        },
    )?;

    let (entries, total, page) = audit::query(&state.db, &filter, query.page).await?;
    Ok(Json(AuditResponse {
        entries,
        total,
        page,
        page_size: PAGE_SIZE,
    }))
}
