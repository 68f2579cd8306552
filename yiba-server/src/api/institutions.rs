//! Institution endpoints

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::Institution;
use yiba_common::status::InstitutionStatus;
use yiba_common::Capability;

use super::{assert_can_read_institution, require_cap};
use crate::db::institutions::{self, InstitutionFilter, InstitutionUpdate};
use crate::error::{ApiError, ApiResult};
use crate::pagination::PAGE_SIZE;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateInstitutionRequest {
    pub name: String,
    pub trading_name: Option<String>,
    pub sdl_number: Option<String>,
    pub contact_email: String,
    pub phone: Option<String>,
    pub province: Option<String>,
}

/// POST /api/institutions
pub async fn create_institution(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateInstitutionRequest>,
) -> ApiResult<Json<Institution>> {
    require_cap(&auth, Capability::InstitutionCreate)?;

    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if !request.contact_email.contains('@') {
        return Err(ApiError::BadRequest("contact_email is invalid".to_string()));
    }

    let institution = Institution {
        id: Uuid::new_v4(),
        name: request.name.trim().to_string(),
        trading_name: request.trading_name,
        sdl_number: request.sdl_number,
        contact_email: request.contact_email.trim().to_lowercase(),
        phone: request.phone,
        province: request.province,
        status: InstitutionStatus::Pending,
        created_at: String::new(),
        updated_at: String::new(),
    };
    institutions::insert(&state.db, auth.user_id, &institution).await?;

    let created = institutions::find_by_id(&state.db, institution.id)
        .await?
        .ok_or_else(|| ApiError::Internal("Institution vanished after create".to_string()))?;
    Ok(Json(created))
}

#[derive(Debug, Deserialize)]
pub struct ListInstitutionsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub status: Option<String>,
    pub province: Option<String>,
    pub name: Option<String>,
}

fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct InstitutionListResponse {
    pub institutions: Vec<Institution>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// GET /api/institutions
///
/// Institution users see only their own institution; the filters apply
/// to regulator and platform listings.
pub async fn list_institutions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListInstitutionsQuery>,
) -> ApiResult<Json<InstitutionListResponse>> {
    require_cap(&auth, Capability::InstitutionRead)?;

    if let Some(own) = auth.institution_id {
        let institution = institutions::find_by_id(&state.db, own)
            .await?
            .ok_or_else(|| ApiError::NotFound("Institution".to_string()))?;
        return Ok(Json(InstitutionListResponse {
            institutions: vec![institution],
            total: 1,
            page: 1,
            page_size: PAGE_SIZE,
        }));
    }

    let status = query
        .status
        .as_deref()
        .map(InstitutionStatus::parse)
        .transpose()
        .map_err(|_| ApiError::BadRequest("Unknown status filter".to_string()))?;

    let filter = InstitutionFilter {
        status,
        province: query.province,
        name: query.name,
    };
    let (institutions, total, page) = institutions::list(&state.db, &filter, query.page).await?;

    Ok(Json(InstitutionListResponse {
        institutions,
        total,
        page,
        page_size: PAGE_SIZE,
    }))
}

/// GET /api/institutions/:id
pub async fn get_institution(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Institution>> {
    require_cap(&auth, Capability::InstitutionRead)?;
    assert_can_read_institution(&state, &auth, id).await?;

    let institution = institutions::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Institution {}", id)))?;
    Ok(Json(institution))
}

/// PUT /api/institutions/:id
pub async fn update_institution(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateInstitutionRequest>,
) -> ApiResult<Json<Institution>> {
    require_cap(&auth, Capability::InstitutionUpdate)?;

    // Institution admins may only edit their own institution
    if let Some(own) = auth.institution_id {
        if own != id {
            return Err(ApiError::Forbidden(
                "Cannot update another institution".to_string(),
            ));
        }
    }

    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if !request.contact_email.contains('@') {
        return Err(ApiError::BadRequest("contact_email is invalid".to_string()));
    }

    let changes = InstitutionUpdate {
        name: request.name.trim().to_string(),
        trading_name: request.trading_name,
        sdl_number: request.sdl_number,
        contact_email: request.contact_email.trim().to_lowercase(),
        phone: request.phone,
        province: request.province,
    };
    let updated = institutions::update(&state.db, auth.user_id, id, &changes).await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

/// PUT /api/institutions/:id/status
pub async fn set_institution_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetStatusRequest>,
) -> ApiResult<Json<Institution>> {
    require_cap(&auth, Capability::InstitutionStatus)?;

    let status = InstitutionStatus::parse(&request.status)
        .map_err(|_| ApiError::BadRequest(format!("Unknown status: {}", request.status)))?;

    let updated = institutions::set_status(&state.db, auth.user_id, id, status).await?;
    Ok(Json(updated))
}
