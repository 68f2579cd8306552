//! Enrolment endpoints

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::Enrolment;
use yiba_common::status::EnrolmentStatus;
use yiba_common::Capability;

use super::{assert_can_read_institution, require_cap, scoped_institution};
use crate::db::{enrolments, learners, qualifications};
use crate::error::{ApiError, ApiResult};
use crate::pagination::PAGE_SIZE;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateEnrolmentRequest {
    pub learner_id: Uuid,
    pub qualification_id: Uuid,
    /// ISO date; defaults to today
    pub enrolled_on: Option<String>,
}

/// POST /api/enrolments
pub async fn create_enrolment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateEnrolmentRequest>,
) -> ApiResult<Json<Enrolment>> {
    require_cap(&auth, Capability::EnrolmentWrite)?;

    let learner = learners::find_by_id(&state.db, request.learner_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Learner {}", request.learner_id)))?;
    let institution_id = scoped_institution(&auth, Some(learner.institution_id))?;

    let qualification = qualifications::find_by_id(&state.db, request.qualification_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Qualification {}", request.qualification_id)))?;
    if !qualification.active {
        return Err(ApiError::Conflict(format!(
            "Qualification {} is no longer active",
            qualification.code
        )));
    }

    if enrolments::exists(&state.db, request.learner_id, request.qualification_id).await? {
        return Err(ApiError::Conflict(
            "Learner is already enrolled in this qualification".to_string(),
        ));
    }

    let enrolled_on = request
        .enrolled_on
        .unwrap_or_else(|| chrono::Utc::now().date_naive().to_string());

    let enrolment = Enrolment {
        id: Uuid::new_v4(),
        institution_id,
        learner_id: request.learner_id,
        qualification_id: request.qualification_id,
        status: EnrolmentStatus::Registered,
        enrolled_on,
        completed_on: None,
    };
    enrolments::insert(&state.db, auth.user_id, &enrolment).await?;

    let created = enrolments::find_by_id(&state.db, enrolment.id)
        .await?
        .ok_or_else(|| ApiError::Internal("Enrolment vanished after create".to_string()))?;
    Ok(Json(created))
}

#[derive(Debug, Deserialize)]
pub struct ListEnrolmentsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub institution_id: Option<Uuid>,
    pub status: Option<String>,
}

fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct EnrolmentListResponse {
    pub enrolments: Vec<Enrolment>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// GET /api/enrolments
pub async fn list_enrolments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListEnrolmentsQuery>,
) -> ApiResult<Json<EnrolmentListResponse>> {
    require_cap(&auth, Capability::LearnerRead)?;
    let institution_id = scoped_institution(&auth, query.institution_id)?;
    assert_can_read_institution(&state, &auth, institution_id).await?;

    let status = query
        .status
        .as_deref()
        .map(EnrolmentStatus::parse)
        .transpose()
        .map_err(|_| ApiError::BadRequest("Unknown status filter".to_string()))?;

    let (enrolments, total, page) =
        enrolments::list(&state.db, institution_id, status, query.page).await?;
    Ok(Json(EnrolmentListResponse {
        enrolments,
        total,
        page,
        page_size: PAGE_SIZE,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetEnrolmentStatusRequest {
    pub status: String,
    /// Required when completing
    pub completed_on: Option<String>,
}

/// PUT /api/enrolments/:id/status
pub async fn set_enrolment_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetEnrolmentStatusRequest>,
) -> ApiResult<Json<Enrolment>> {
    require_cap(&auth, Capability::EnrolmentWrite)?;

    let enrolment = enrolments::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Enrolment {}", id)))?;
    scoped_institution(&auth, Some(enrolment.institution_id))?;

    let to = EnrolmentStatus::parse(&request.status)
        .map_err(|_| ApiError::BadRequest(format!("Unknown status: {}", request.status)))?;

    let updated =
        enrolments::set_status(&state.db, auth.user_id, id, to, request.completed_on).await?;
    Ok(Json(updated))
}
