//! Role-based dashboard aggregates

use axum::{extract::State, Extension, Json};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::{Capability, Role};

use super::require_cap;
use crate::db::{enrolments, notifications, readiness, reviews, submissions};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regulator: Option<Value>,
}

fn counts_to_object(counts: Vec<(String, i64)>) -> Value {
    let mut map = Map::new();
    for (key, count) in counts {
        map.insert(key, Value::from(count));
    }
    Value::Object(map)
}

async fn institution_panel(
    state: &AppState,
    user_id: Uuid,
    institution_id: Uuid,
) -> Result<Value, ApiError> {
    let learner_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM learners WHERE institution_id = ?")
            .bind(institution_id.to_string())
            .fetch_one(&state.db)
            .await
            .map_err(ApiError::from)?;

    let enrolment_counts = enrolments::counts_by_status(&state.db, institution_id).await?;
    let readiness_counts = readiness::counts_by_status(&state.db, Some(institution_id)).await?;
    let submission_counts = submissions::counts_by_status(&state.db, Some(institution_id)).await?;
    let unread = notifications::unread_count(&state.db, user_id).await?;

    Ok(serde_json::json!({
        "learners": learner_count,
        "enrolments_by_status": counts_to_object(enrolment_counts),
        "readiness_by_status": counts_to_object(readiness_counts),
        "submissions_by_status": counts_to_object(submission_counts),
        "unread_notifications": unread,
    }))
}

async fn regulator_panel(state: &AppState) -> Result<Value, ApiError> {
    let institution_counts: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM institutions GROUP BY status")
            .fetch_all(&state.db)
            .await
            .map_err(ApiError::from)?;

    let submission_counts = submissions::counts_by_status(&state.db, None).await?;
    let readiness_counts = readiness::counts_by_status(&state.db, None).await?;
    let workload = reviews::workload_by_reviewer(&state.db).await?;

    Ok(serde_json::json!({
        "institutions_by_status": counts_to_object(institution_counts),
        "submissions_by_status": counts_to_object(submission_counts),
        "readiness_by_status": counts_to_object(readiness_counts),
        "review_workload": counts_to_object(workload),
    }))
}

/// GET /api/dashboard
pub async fn get_dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<DashboardResponse>> {
    require_cap(&auth, Capability::DashboardView)?;

    let response = match auth.role {
        Role::InstitutionAdmin | Role::InstitutionStaff => {
            let institution_id = auth
                .institution_id
                .ok_or_else(|| ApiError::Internal("Institution role without tenancy".to_string()))?;
            DashboardResponse {
                role: auth.role,
                institution: Some(institution_panel(&state, auth.user_id, institution_id).await?),
                regulator: None,
            }
        }
        Role::QctoAdmin | Role::QctoReviewer => DashboardResponse {
            role: auth.role,
            institution: None,
            regulator: Some(regulator_panel(&state).await?),
        },
        Role::PlatformAdmin => {
            let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                .fetch_one(&state.db)
                .await
                .map_err(ApiError::from)?;
            let mut regulator = regulator_panel(&state).await?;
            if let Some(map) = regulator.as_object_mut() {
                map.insert("users".to_string(), Value::from(user_count));
            }
            DashboardResponse {
                role: auth.role,
                institution: None,
                regulator: Some(regulator),
            }
        }
    };

    Ok(Json(response))
}
