//! Submission endpoints

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::{Document, Submission};
use yiba_common::events::YibaEvent;
use yiba_common::status::SubmissionStatus;
use yiba_common::{Capability, Role};

use super::{require_cap, scoped_institution};
use crate::db::submissions::SubmissionScope;
use crate::db::{documents, readiness, reviews, submissions};
use crate::error::{ApiError, ApiResult};
use crate::pagination::PAGE_SIZE;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSubmissionRequest {
    pub title: String,
    pub institution_id: Option<Uuid>,
    pub readiness_form_id: Option<Uuid>,
}

/// POST /api/submissions
pub async fn create_submission(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateSubmissionRequest>,
) -> ApiResult<Json<Submission>> {
    require_cap(&auth, Capability::SubmissionWrite)?;
    let institution_id = scoped_institution(&auth, request.institution_id)?;

    if request.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }

    if let Some(form_id) = request.readiness_form_id {
        let form = readiness::find_by_id(&state.db, form_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Readiness form {}", form_id)))?;
        if form.institution_id != institution_id {
            return Err(ApiError::Forbidden(
                "Readiness form belongs to another institution".to_string(),
            ));
        }
    }

    let submission = Submission {
        id: Uuid::new_v4(),
        institution_id,
        readiness_form_id: request.readiness_form_id,
        title: request.title.trim().to_string(),
        status: SubmissionStatus::Draft,
        submitted_at: None,
        decided_at: None,
    };
    submissions::insert(&state.db, auth.user_id, &submission).await?;

    let created = submissions::find_by_id(&state.db, submission.id)
        .await?
        .ok_or_else(|| ApiError::Internal("Submission vanished after create".to_string()))?;
    Ok(Json(created))
}

/// Visibility check for one submission
async fn assert_can_read_submission(
    state: &AppState,
    auth: &AuthUser,
    submission: &Submission,
) -> Result<(), ApiError> {
    match auth.role {
        Role::PlatformAdmin => Ok(()),
        Role::QctoAdmin => {
            if submission.status == SubmissionStatus::Draft {
                Err(ApiError::Forbidden("Draft submissions are not visible to QCTO".to_string()))
            } else {
                Ok(())
            }
        }
        Role::QctoReviewer => {
            let assigned =
                reviews::is_assigned(&state.db, submission.id, auth.user_id).await?;
            if assigned && submission.status != SubmissionStatus::Draft {
                Ok(())
            } else {
                Err(ApiError::Forbidden(
                    "Submission is not assigned to this reviewer".to_string(),
                ))
            }
        }
        Role::InstitutionAdmin | Role::InstitutionStaff => {
            if auth.institution_id == Some(submission.institution_id) {
                Ok(())
            } else {
                Err(ApiError::Forbidden(
                    "Cannot read another institution's submission".to_string(),
                ))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListSubmissionsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub status: Option<String>,
}

fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct SubmissionListResponse {
    pub submissions: Vec<Submission>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// GET /api/submissions
pub async fn list_submissions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListSubmissionsQuery>,
) -> ApiResult<Json<SubmissionListResponse>> {
    require_cap(&auth, Capability::SubmissionRead)?;

    let scope = match auth.role {
        Role::InstitutionAdmin | Role::InstitutionStaff => SubmissionScope::Institution(
            auth.institution_id
                .ok_or_else(|| ApiError::Internal("Institution role without tenancy".to_string()))?,
        ),
        Role::QctoReviewer => SubmissionScope::Reviewer(auth.user_id),
        Role::QctoAdmin => SubmissionScope::All { include_drafts: false },
        Role::PlatformAdmin => SubmissionScope::All { include_drafts: true },
    };

    let status = query
        .status
        .as_deref()
        .map(SubmissionStatus::parse)
        .transpose()
        .map_err(|_| ApiError::BadRequest("Unknown status filter".to_string()))?;

    let (submissions, total, page) =
        submissions::list(&state.db, &scope, status, query.page).await?;
    Ok(Json(SubmissionListResponse {
        submissions,
        total,
        page,
        page_size: PAGE_SIZE,
    }))
}

#[derive(Debug, Serialize)]
pub struct SubmissionDetailResponse {
    #[serde(flatten)]
    pub submission: Submission,
    pub documents: Vec<Document>,
}

/// GET /api/submissions/:id
pub async fn get_submission(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubmissionDetailResponse>> {
    require_cap(&auth, Capability::SubmissionRead)?;

    let submission = submissions::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission {}", id)))?;
    assert_can_read_submission(&state, &auth, &submission).await?;

    let documents = documents::list_for_submission(&state.db, id).await?;
    Ok(Json(SubmissionDetailResponse {
        submission,
        documents,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub document_id: Uuid,
}

/// POST /api/submissions/:id/items
pub async fn add_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddItemRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::SubmissionWrite)?;

    let submission = submissions::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission {}", id)))?;
    scoped_institution(&auth, Some(submission.institution_id))?;

    if !submission.status.is_editable() {
        return Err(ApiError::Conflict(format!(
            "Submission cannot be edited while {}",
            submission.status.as_str()
        )));
    }

    let document = documents::find_by_id(&state.db, request.document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {}", request.document_id)))?;
    if document.institution_id != submission.institution_id {
        return Err(ApiError::Forbidden(
            "Document belongs to another institution".to_string(),
        ));
    }

    submissions::add_item(&state.db, auth.user_id, &submission, request.document_id).await?;
    Ok(Json(serde_json::json!({ "added": request.document_id })))
}

/// DELETE /api/submissions/:id/items/:document_id
pub async fn remove_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((id, document_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::SubmissionWrite)?;

    let submission = submissions::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission {}", id)))?;
    scoped_institution(&auth, Some(submission.institution_id))?;

    if !submission.status.is_editable() {
        return Err(ApiError::Conflict(format!(
            "Submission cannot be edited while {}",
            submission.status.as_str()
        )));
    }

    submissions::remove_item(&state.db, auth.user_id, &submission, document_id).await?;
    Ok(Json(serde_json::json!({ "removed": document_id })))
}

/// POST /api/submissions/:id/submit
///
/// Requires at least one attached document.
pub async fn submit_submission(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Submission>> {
    require_cap(&auth, Capability::SubmissionWrite)?;

    let submission = submissions::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission {}", id)))?;
    scoped_institution(&auth, Some(submission.institution_id))?;

    if submissions::item_count(&state.db, id).await? == 0 {
        return Err(ApiError::Conflict(
            "A submission needs at least one document".to_string(),
        ));
    }

    let updated =
        submissions::set_status(&state.db, auth.user_id, &submission, SubmissionStatus::Submitted)
            .await?;

    state.events.emit(YibaEvent::SubmissionSubmitted {
        submission_id: id,
        institution_id: submission.institution_id,
        timestamp: chrono::Utc::now(),
    });

    Ok(Json(updated))
}
