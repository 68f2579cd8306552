//! Review assignment and decision endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::{Review, ReviewAssignment, Submission};
use yiba_common::events::YibaEvent;
use yiba_common::status::SubmissionStatus;
use yiba_common::{Capability, Role};

use super::require_cap;
use crate::db::{reviews, submissions, users};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

async fn load_submission(state: &AppState, id: Uuid) -> ApiResult<Submission> {
    submissions::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission {}", id)))
}

#[derive(Debug, Deserialize)]
pub struct AssignReviewerRequest {
    pub reviewer_id: Uuid,
}

/// POST /api/submissions/:id/assignments
///
/// Assigning the first reviewer also moves a submitted submission into
/// under_review.
pub async fn assign_reviewer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignReviewerRequest>,
) -> ApiResult<Json<ReviewAssignment>> {
    require_cap(&auth, Capability::ReviewAssign)?;

    let submission = load_submission(&state, id).await?;
    if submission.status == SubmissionStatus::Draft {
        return Err(ApiError::Conflict(
            "Draft submissions cannot be assigned".to_string(),
        ));
    }
    if submission.status.is_terminal() {
        return Err(ApiError::Conflict(
            "Decided submissions cannot be assigned".to_string(),
        ));
    }

    let reviewer = users::find_by_id(&state.db, request.reviewer_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {}", request.reviewer_id)))?;
    if reviewer.role != Role::QctoReviewer || !reviewer.active {
        return Err(ApiError::BadRequest(
            "Assignee must be an active QCTO reviewer".to_string(),
        ));
    }

    let assignment = reviews::assign(
        &state.db,
        auth.user_id,
        submission.institution_id,
        id,
        request.reviewer_id,
    )
    .await?;

    if submission.status == SubmissionStatus::Submitted {
        submissions::set_status(&state.db, auth.user_id, &submission, SubmissionStatus::UnderReview)
            .await?;
    }

    state.events.emit(YibaEvent::ReviewAssigned {
        submission_id: id,
        institution_id: submission.institution_id,
        reviewer_id: request.reviewer_id,
        timestamp: chrono::Utc::now(),
    });

    Ok(Json(assignment))
}

/// DELETE /api/submissions/:id/assignments/:reviewer_id
pub async fn unassign_reviewer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((id, reviewer_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::ReviewAssign)?;

    let submission = load_submission(&state, id).await?;
    reviews::unassign(&state.db, auth.user_id, submission.institution_id, id, reviewer_id).await?;
    Ok(Json(serde_json::json!({ "unassigned": reviewer_id })))
}

/// GET /api/submissions/:id/assignments
pub async fn list_assignments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ReviewAssignment>>> {
    require_cap(&auth, Capability::ReviewAssign)?;

    load_submission(&state, id).await?;
    let assignments = reviews::list_assignments(&state.db, id).await?;
    Ok(Json(assignments))
}

#[derive(Debug, Deserialize)]
pub struct RecordReviewRequest {
    /// accept, decline or return
    pub outcome: String,
    pub comment: Option<String>,
}

/// POST /api/submissions/:id/reviews
///
/// Only an assigned reviewer (or QCTO/platform admin) may decide; the
/// decision moves the submission to its matching state.
pub async fn record_review(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<RecordReviewRequest>,
) -> ApiResult<Json<Review>> {
    require_cap(&auth, Capability::SubmissionReview)?;

    let submission = load_submission(&state, id).await?;

    let to = match request.outcome.as_str() {
        "accept" => SubmissionStatus::Accepted,
        "decline" => SubmissionStatus::Declined,
        "return" => SubmissionStatus::Returned,
        other => {
            return Err(ApiError::BadRequest(format!("Unknown outcome: {}", other)));
        }
    };

    // Reviewers must hold an active assignment; admins may decide directly
    if auth.role == Role::QctoReviewer
        && !reviews::is_assigned(&state.db, id, auth.user_id).await?
    {
        return Err(ApiError::Forbidden(
            "Submission is not assigned to this reviewer".to_string(),
        ));
    }

    if submission.status != SubmissionStatus::UnderReview {
        return Err(ApiError::Conflict(format!(
            "Submission is {} and cannot be decided",
            submission.status.as_str()
        )));
    }

    let review = Review {
        id: Uuid::new_v4(),
        submission_id: id,
        reviewer_id: auth.user_id,
        outcome: request.outcome.clone(),
        comment: request.comment.unwrap_or_default(),
        created_at: String::new(),
    };
    reviews::insert_review(&state.db, submission.institution_id, &review).await?;

    submissions::set_status(&state.db, auth.user_id, &submission, to).await?;

    // The decision closes the review cycle; a resubmission is assigned
    // afresh
    reviews::deactivate_all(&state.db, id).await?;

    state.events.emit(YibaEvent::SubmissionDecided {
        submission_id: id,
        institution_id: submission.institution_id,
        outcome: to.as_str().to_string(),
        timestamp: chrono::Utc::now(),
    });

    let reviews = reviews::list_reviews(&state.db, id).await?;
    let stored = reviews
        .into_iter()
        .find(|r| r.id == review.id)
        .ok_or_else(|| ApiError::Internal("Review vanished after create".to_string()))?;
    Ok(Json(stored))
}

/// GET /api/submissions/:id/reviews
pub async fn list_reviews(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Review>>> {
    require_cap(&auth, Capability::SubmissionRead)?;

    let submission = load_submission(&state, id).await?;

    // Institutions see reviews of their own submissions once decided or
    // returned; reviewers and admins see them per read scoping
    if let Some(own) = auth.institution_id {
        if own != submission.institution_id {
            return Err(ApiError::Forbidden(
                "Cannot read another institution's reviews".to_string(),
            ));
        }
    } else if auth.role == Role::QctoReviewer
        && !reviews::is_assigned(&state.db, id, auth.user_id).await?
    {
        return Err(ApiError::Forbidden(
            "Submission is not assigned to this reviewer".to_string(),
        ));
    }

    let reviews = reviews::list_reviews(&state.db, id).await?;
    Ok(Json(reviews))
}
