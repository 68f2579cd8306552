//! Readiness (Form 5) endpoints

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::{ReadinessForm, ReadinessSection};
use yiba_common::events::YibaEvent;
use yiba_common::status::{ReadinessStatus, SectionStatus};
use yiba_common::Capability;

use super::{assert_can_read_institution, require_cap, scoped_institution};
use crate::db::{qualifications, readiness};
use crate::error::{ApiError, ApiResult};
use crate::pagination::PAGE_SIZE;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateFormRequest {
    pub institution_id: Option<Uuid>,
    pub qualification_id: Uuid,
}

/// POST /api/readiness
pub async fn create_form(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateFormRequest>,
) -> ApiResult<Json<ReadinessForm>> {
    require_cap(&auth, Capability::ReadinessWrite)?;
    let institution_id = scoped_institution(&auth, request.institution_id)?;

    qualifications::find_by_id(&state.db, request.qualification_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Qualification {}", request.qualification_id)))?;

    if readiness::exists_for_qualification(&state.db, institution_id, request.qualification_id)
        .await?
    {
        return Err(ApiError::Conflict(
            "A readiness application already exists for this qualification".to_string(),
        ));
    }

    let form =
        readiness::create(&state.db, auth.user_id, institution_id, request.qualification_id).await?;
    Ok(Json(form))
}

#[derive(Debug, Deserialize)]
pub struct ListFormsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub institution_id: Option<Uuid>,
    pub status: Option<String>,
}

fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct FormListResponse {
    pub forms: Vec<ReadinessForm>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// GET /api/readiness
///
/// Institution users see their own forms; regulator and platform roles
/// see all (optionally filtered to one institution).
pub async fn list_forms(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListFormsQuery>,
) -> ApiResult<Json<FormListResponse>> {
    require_cap(&auth, Capability::ReadinessRead)?;

    let institution_scope = match auth.institution_id {
        Some(own) => Some(own),
        None => query.institution_id,
    };

    // Reviewers list one visible institution at a time
    if auth.role == yiba_common::Role::QctoReviewer {
        let id = institution_scope.ok_or_else(|| {
            ApiError::BadRequest("institution_id is required for reviewers".to_string())
        })?;
        super::assert_can_read_institution(&state, &auth, id).await?;
    }

    let status = query
        .status
        .as_deref()
        .map(ReadinessStatus::parse)
        .transpose()
        .map_err(|_| ApiError::BadRequest("Unknown status filter".to_string()))?;

    let (forms, total, page) =
        readiness::list(&state.db, institution_scope, status, query.page).await?;
    Ok(Json(FormListResponse {
        forms,
        total,
        page,
        page_size: PAGE_SIZE,
    }))
}

#[derive(Debug, Serialize)]
pub struct FormDetailResponse {
    #[serde(flatten)]
    pub form: ReadinessForm,
    pub sections: Vec<ReadinessSection>,
}

/// GET /api/readiness/:id
pub async fn get_form(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<FormDetailResponse>> {
    require_cap(&auth, Capability::ReadinessRead)?;

    let form = readiness::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Readiness form {}", id)))?;
    assert_can_read_institution(&state, &auth, form.institution_id).await?;

    let sections = readiness::sections(&state.db, id).await?;
    Ok(Json(FormDetailResponse { form, sections }))
}

#[derive(Debug, Deserialize)]
pub struct UpsertSectionRequest {
    pub payload: serde_json::Value,
    /// Marks the section complete; defaults to incomplete while editing
    #[serde(default)]
    pub complete: bool,
}

/// PUT /api/readiness/:id/sections/:key
pub async fn upsert_section(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((id, key)): Path<(Uuid, String)>,
    Json(request): Json<UpsertSectionRequest>,
) -> ApiResult<Json<ReadinessSection>> {
    require_cap(&auth, Capability::ReadinessWrite)?;

    let form = readiness::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Readiness form {}", id)))?;
    scoped_institution(&auth, Some(form.institution_id))?;

    // Sections are editable only while the institution holds the form
    if !matches!(
        form.status,
        ReadinessStatus::Draft | ReadinessStatus::InProgress | ReadinessStatus::Returned
    ) {
        return Err(ApiError::Conflict(format!(
            "Sections cannot be edited while the form is {}",
            form.status.as_str()
        )));
    }
    // A returned form re-enters progress on first edit
    let form = if form.status == ReadinessStatus::Returned {
        readiness::set_status(&state.db, auth.user_id, &form, ReadinessStatus::InProgress, None)
            .await?
    } else {
        form
    };

    let status = if request.complete {
        SectionStatus::Complete
    } else {
        SectionStatus::Incomplete
    };
    let section =
        readiness::upsert_section(&state.db, auth.user_id, &form, &key, &request.payload, status)
            .await?;
    Ok(Json(section))
}

/// POST /api/readiness/:id/submit
///
/// Requires every section complete.
pub async fn submit_form(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ReadinessForm>> {
    require_cap(&auth, Capability::ReadinessWrite)?;

    let form = readiness::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Readiness form {}", id)))?;
    scoped_institution(&auth, Some(form.institution_id))?;

    let incomplete = readiness::incomplete_section_count(&state.db, id).await?;
    if incomplete > 0 {
        return Err(ApiError::Conflict(format!(
            "{} section(s) are still incomplete",
            incomplete
        )));
    }

    let updated =
        readiness::set_status(&state.db, auth.user_id, &form, ReadinessStatus::Submitted, None)
            .await?;

    state.events.emit(YibaEvent::ReadinessSubmitted {
        form_id: id,
        institution_id: form.institution_id,
        timestamp: chrono::Utc::now(),
    });

    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct DecideFormRequest {
    /// Target status: under_review, approved, rejected or returned
    pub status: String,
    pub comment: Option<String>,
}

/// POST /api/readiness/:id/decision
///
/// Regulator-side moves only; the transition table rejects everything
/// else with a 409.
pub async fn decide_form(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<DecideFormRequest>,
) -> ApiResult<Json<ReadinessForm>> {
    require_cap(&auth, Capability::ReadinessReview)?;

    let form = readiness::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Readiness form {}", id)))?;

    let to = ReadinessStatus::parse(&request.status)
        .map_err(|_| ApiError::BadRequest(format!("Unknown status: {}", request.status)))?;
    if !form.status.is_review_transition(to) {
        return Err(ApiError::Conflict(format!(
            "{} -> {} is not a review transition",
            form.status.as_str(),
            to.as_str()
        )));
    }

    let updated =
        readiness::set_status(&state.db, auth.user_id, &form, to, request.comment.as_deref())
            .await?;

    if matches!(
        to,
        ReadinessStatus::Approved | ReadinessStatus::Rejected | ReadinessStatus::Returned
    ) {
        state.events.emit(YibaEvent::ReadinessDecided {
            form_id: id,
            institution_id: form.institution_id,
            status: to.as_str().to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    Ok(Json(updated))
}
