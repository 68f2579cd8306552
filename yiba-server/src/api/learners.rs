//! Learner endpoints

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::Learner;
use yiba_common::idnum::validate_national_id;
use yiba_common::Capability;

use super::{assert_can_read_institution, require_cap, scoped_institution};
use crate::db::learners::{self, LearnerUpdate};
use crate::error::{ApiError, ApiResult};
use crate::pagination::PAGE_SIZE;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateLearnerRequest {
    /// Required for regulator/platform callers; implied for institution
    /// users
    pub institution_id: Option<Uuid>,
    pub national_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
}

fn validate_learner_fields(
    national_id: &str,
    first_name: &str,
    last_name: &str,
    gender: &Option<String>,
) -> Result<(), ApiError> {
    validate_national_id(national_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid national ID: {}", e)))?;
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "first_name and last_name are required".to_string(),
        ));
    }
    if let Some(gender) = gender {
        if !["female", "male", "other"].contains(&gender.as_str()) {
            return Err(ApiError::BadRequest(format!("Unknown gender: {}", gender)));
        }
    }
    Ok(())
}

/// POST /api/learners
pub async fn create_learner(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateLearnerRequest>,
) -> ApiResult<Json<Learner>> {
    require_cap(&auth, Capability::LearnerWrite)?;
    let institution_id = scoped_institution(&auth, request.institution_id)?;

    validate_learner_fields(
        &request.national_id,
        &request.first_name,
        &request.last_name,
        &request.gender,
    )?;

    if learners::national_id_exists(&state.db, institution_id, &request.national_id, None).await? {
        return Err(ApiError::Conflict(
            "A learner with this national ID is already registered".to_string(),
        ));
    }

    let learner = Learner {
        id: Uuid::new_v4(),
        institution_id,
        national_id: request.national_id,
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
        email: request.email,
        phone: request.phone,
        gender: request.gender,
        birth_date: request.birth_date,
        created_at: String::new(),
        updated_at: String::new(),
    };
    learners::insert(&state.db, auth.user_id, &learner).await?;

    let created = learners::find_by_id(&state.db, learner.id)
        .await?
        .ok_or_else(|| ApiError::Internal("Learner vanished after create".to_string()))?;
    Ok(Json(created))
}

#[derive(Debug, Deserialize)]
pub struct ListLearnersQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub institution_id: Option<Uuid>,
    /// Substring match on names or national ID
    pub search: Option<String>,
}

fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct LearnerListResponse {
    pub learners: Vec<Learner>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// GET /api/learners
pub async fn list_learners(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListLearnersQuery>,
) -> ApiResult<Json<LearnerListResponse>> {
    require_cap(&auth, Capability::LearnerRead)?;
    let institution_id = scoped_institution(&auth, query.institution_id)?;
    assert_can_read_institution(&state, &auth, institution_id).await?;

    let (learners, total, page) =
        learners::list(&state.db, institution_id, query.search.as_deref(), query.page).await?;
    Ok(Json(LearnerListResponse {
        learners,
        total,
        page,
        page_size: PAGE_SIZE,
    }))
}

/// GET /api/learners/:id
pub async fn get_learner(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Learner>> {
    require_cap(&auth, Capability::LearnerRead)?;

    let learner = learners::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Learner {}", id)))?;
    assert_can_read_institution(&state, &auth, learner.institution_id).await?;

    Ok(Json(learner))
}

#[derive(Debug, Deserialize)]
pub struct UpdateLearnerRequest {
    pub national_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
}

/// PUT /api/learners/:id
pub async fn update_learner(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateLearnerRequest>,
) -> ApiResult<Json<Learner>> {
    require_cap(&auth, Capability::LearnerWrite)?;

    let learner = learners::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Learner {}", id)))?;
    scoped_institution(&auth, Some(learner.institution_id))?;

    validate_learner_fields(
        &request.national_id,
        &request.first_name,
        &request.last_name,
        &request.gender,
    )?;

    if learners::national_id_exists(&state.db, learner.institution_id, &request.national_id, Some(id))
        .await?
    {
        return Err(ApiError::Conflict(
            "A learner with this national ID is already registered".to_string(),
        ));
    }

    let changes = LearnerUpdate {
        national_id: request.national_id,
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
        email: request.email,
        phone: request.phone,
        gender: request.gender,
        birth_date: request.birth_date,
    };
    let updated = learners::update(&state.db, auth.user_id, id, &changes).await?;
    Ok(Json(updated))
}

/// DELETE /api/learners/:id
pub async fn delete_learner(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::LearnerWrite)?;

    let learner = learners::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Learner {}", id)))?;
    scoped_institution(&auth, Some(learner.institution_id))?;

    learners::delete(&state.db, auth.user_id, id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}
