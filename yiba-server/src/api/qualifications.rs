//! Qualification registry endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::Qualification;
use yiba_common::Capability;

use super::require_cap;
use crate::db::qualifications::{self, QualificationUpdate};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateQualificationRequest {
    pub code: String,
    pub title: String,
    pub nqf_level: i64,
    pub curriculum_code: Option<String>,
}

/// POST /api/qualifications
pub async fn create_qualification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateQualificationRequest>,
) -> ApiResult<Json<Qualification>> {
    require_cap(&auth, Capability::QualificationWrite)?;

    let code = request.code.trim().to_uppercase();
    if code.is_empty() || request.title.trim().is_empty() {
        return Err(ApiError::BadRequest("code and title are required".to_string()));
    }
    if !(1..=10).contains(&request.nqf_level) {
        return Err(ApiError::BadRequest(
            "nqf_level must be between 1 and 10".to_string(),
        ));
    }
    if qualifications::code_exists(&state.db, &code).await? {
        return Err(ApiError::Conflict(format!(
            "Qualification code {} already exists",
            code
        )));
    }

    let qualification = Qualification {
        id: Uuid::new_v4(),
        code,
        title: request.title.trim().to_string(),
        nqf_level: request.nqf_level,
        curriculum_code: request.curriculum_code,
        active: true,
    };
    qualifications::insert(&state.db, auth.user_id, &qualification).await?;

    let created = qualifications::find_by_id(&state.db, qualification.id)
        .await?
        .ok_or_else(|| ApiError::Internal("Qualification vanished after create".to_string()))?;
    Ok(Json(created))
}

/// GET /api/qualifications
///
/// Readable by every authenticated user; institutions pick from this
/// registry when enrolling learners.
pub async fn list_qualifications(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Qualification>>> {
    let qualifications = qualifications::list(&state.db).await?;
    Ok(Json(qualifications))
}

#[derive(Debug, Deserialize)]
pub struct UpdateQualificationRequest {
    pub title: String,
    pub nqf_level: i64,
    pub curriculum_code: Option<String>,
    pub active: bool,
}

/// PUT /api/qualifications/:id
pub async fn update_qualification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateQualificationRequest>,
) -> ApiResult<Json<Qualification>> {
    require_cap(&auth, Capability::QualificationWrite)?;

    if !(1..=10).contains(&request.nqf_level) {
        return Err(ApiError::BadRequest(
            "nqf_level must be between 1 and 10".to_string(),
        ));
    }

    let changes = QualificationUpdate {
        title: request.title.trim().to_string(),
        nqf_level: request.nqf_level,
        curriculum_code: request.curriculum_code,
        active: request.active,
    };
    let updated = qualifications::update(&state.db, auth.user_id, id, &changes).await?;
    Ok(Json(updated))
}
