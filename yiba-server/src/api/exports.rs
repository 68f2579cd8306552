//! CSV and JSON export endpoints
//!
//! CSV is written with the csv crate so quoting and embedded separators
//! are handled properly; responses are attachments with stable headers.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::Capability;

use super::{assert_can_read_institution, require_cap, scoped_institution};
use crate::db::audit::{self, AuditFilter};
use crate::db::{documents, enrolments, learners, readiness};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

fn csv_response(file_name: &str, body: Vec<u8>) -> (HeaderMap, Vec<u8>) {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    let disposition = format!("attachment; filename=\"{}\"", file_name);
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).unwrap_or(HeaderValue::from_static("attachment")),
    );
    (headers, body)
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, ApiError> {
    writer
        .into_inner()
        .map_err(|e| ApiError::Internal(format!("CSV write failed: {}", e)))
}

#[derive(Debug, Deserialize)]
pub struct ExportScopeQuery {
    pub institution_id: Option<Uuid>,
}

/// GET /api/exports/learners.csv
pub async fn export_learners_csv(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ExportScopeQuery>,
) -> ApiResult<(HeaderMap, Vec<u8>)> {
    require_cap(&auth, Capability::ExportData)?;
    let institution_id = scoped_institution(&auth, query.institution_id)?;
    assert_can_read_institution(&state, &auth, institution_id).await?;

    let learners = learners::list_all(&state.db, institution_id).await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "id",
            "national_id",
            "first_name",
            "last_name",
            "email",
            "phone",
            "gender",
            "birth_date",
            "created_at",
        ])
        .map_err(|e| ApiError::Internal(format!("CSV write failed: {}", e)))?;

    for learner in &learners {
        writer
            .write_record([
                learner.id.to_string().as_str(),
                &learner.national_id,
                &learner.first_name,
                &learner.last_name,
                learner.email.as_deref().unwrap_or(""),
                learner.phone.as_deref().unwrap_or(""),
                learner.gender.as_deref().unwrap_or(""),
                learner.birth_date.as_deref().unwrap_or(""),
                &learner.created_at,
            ])
            .map_err(|e| ApiError::Internal(format!("CSV write failed: {}", e)))?;
    }

    Ok(csv_response("learners.csv", finish_csv(writer)?))
}

/// GET /api/exports/enrolments.csv
pub async fn export_enrolments_csv(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ExportScopeQuery>,
) -> ApiResult<(HeaderMap, Vec<u8>)> {
    require_cap(&auth, Capability::ExportData)?;
    let institution_id = scoped_institution(&auth, query.institution_id)?;
    assert_can_read_institution(&state, &auth, institution_id).await?;

    let enrolments = enrolments::list_all(&state.db, institution_id).await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "id",
            "learner_id",
            "qualification_id",
            "status",
            "enrolled_on",
            "completed_on",
        ])
        .map_err(|e| ApiError::Internal(format!("CSV write failed: {}", e)))?;

    for enrolment in &enrolments {
        writer
            .write_record([
                enrolment.id.to_string().as_str(),
                &enrolment.learner_id.to_string(),
                &enrolment.qualification_id.to_string(),
                enrolment.status.as_str(),
                &enrolment.enrolled_on,
                enrolment.completed_on.as_deref().unwrap_or(""),
            ])
            .map_err(|e| ApiError::Internal(format!("CSV write failed: {}", e)))?;
    }

    Ok(csv_response("enrolments.csv", finish_csv(writer)?))
}

#[derive(Debug, Deserialize)]
pub struct AuditExportQuery {
    pub institution_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// GET /api/exports/audit.csv
pub async fn export_audit_csv(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<AuditExportQuery>,
) -> ApiResult<(HeaderMap, Vec<u8>)> {
    require_cap(&auth, Capability::AuditRead)?;
    require_cap(&auth, Capability::ExportData)?;

    let filter = super::audit::build_filter(
        &auth,
        query.institution_id,
        AuditFilter {
            entity_type: query.entity_type,
            entity_id: None,
            actor_id: None,
            action: None,
            institution_id: None,
            from: query.from,
            to: query.to,
        },
    )?;

    let entries = audit::query_all(&state.db, &filter).await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "id",
            "created_at",
            "actor_id",
            "institution_id",
            "entity_type",
            "entity_id",
            "action",
            "before",
            "after",
        ])
        .map_err(|e| ApiError::Internal(format!("CSV write failed: {}", e)))?;

    for entry in &entries {
        let before = entry
            .before
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let after = entry
            .after
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        writer
            .write_record([
                entry.id.to_string().as_str(),
                &entry.created_at,
                &entry.actor_id.to_string(),
                &entry
                    .institution_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                &entry.entity_type,
                &entry.entity_id,
                &entry.action,
                &before,
                &after,
            ])
            .map_err(|e| ApiError::Internal(format!("CSV write failed: {}", e)))?;
    }

    Ok(csv_response("audit.csv", finish_csv(writer)?))
}

/// GET /api/exports/readiness/:id
///
/// Full JSON export of a readiness form: form, sections and linked
/// document metadata.
pub async fn export_readiness_json(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::ExportData)?;
    require_cap(&auth, Capability::ReadinessRead)?;

    let form = readiness::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Readiness form {}", id)))?;
    assert_can_read_institution(&state, &auth, form.institution_id).await?;

    let sections = readiness::sections(&state.db, id).await?;
    let documents = documents::list_for_readiness_form(&state.db, id).await?;

    Ok(Json(serde_json::json!({
        "form": form,
        "sections": sections,
        "documents": documents,
    })))
}
