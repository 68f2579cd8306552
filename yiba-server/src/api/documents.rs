//! Evidence document endpoints
//!
//! Upload is multipart: metadata fields plus one `file` part. Identical
//! bytes re-uploaded by the same institution resolve to the existing row.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::Document;
use yiba_common::db::settings::get_setting_i64;
use yiba_common::events::YibaEvent;
use yiba_common::status::READINESS_SECTION_KEYS;
use yiba_common::Capability;

use super::{assert_can_read_institution, require_cap, scoped_institution};
use crate::db::{documents, readiness};
use crate::error::{ApiError, ApiResult};
use crate::pagination::PAGE_SIZE;
use crate::services::storage::{content_sha256, storage_key};
use crate::AppState;

const DOCUMENT_KINDS: &[&str] = &["evidence", "policy", "identity", "other"];

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub document: Document,
    /// True when the upload matched an existing document's bytes
    pub deduplicated: bool,
}

/// POST /api/documents (multipart)
///
/// Parts: `file` (required), `kind`, `institution_id`,
/// `readiness_form_id`, `readiness_section_key`.
pub async fn upload_document(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    require_cap(&auth, Capability::DocumentWrite)?;

    let mut file_name = None;
    let mut content_type = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut kind = "evidence".to_string();
    let mut institution_field = None;
    let mut readiness_form_id = None;
    let mut readiness_section_key = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?
                        .to_vec(),
                );
            }
            "kind" => {
                kind = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Malformed field: {}", e)))?;
            }
            "institution_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Malformed field: {}", e)))?;
                institution_field = Some(
                    Uuid::parse_str(&text)
                        .map_err(|_| ApiError::BadRequest("Invalid institution_id".to_string()))?,
                );
            }
            "readiness_form_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Malformed field: {}", e)))?;
                readiness_form_id = Some(
                    Uuid::parse_str(&text)
                        .map_err(|_| ApiError::BadRequest("Invalid readiness_form_id".to_string()))?,
                );
            }
            "readiness_section_key" => {
                readiness_section_key = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Malformed field: {}", e)))?,
                );
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| ApiError::BadRequest("file part is required".to_string()))?;
    let file_name =
        file_name.ok_or_else(|| ApiError::BadRequest("file name is required".to_string()))?;
    let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());

    if !DOCUMENT_KINDS.contains(&kind.as_str()) {
        return Err(ApiError::BadRequest(format!("Unknown document kind: {}", kind)));
    }
    if let Some(key) = &readiness_section_key {
        if !READINESS_SECTION_KEYS.contains(&key.as_str()) {
            return Err(ApiError::BadRequest(format!("Unknown readiness section: {}", key)));
        }
    }

    let institution_id = scoped_institution(&auth, institution_field)?;

    let max_size = get_setting_i64(&state.db, "document_max_size_bytes", 26_214_400).await?;
    if bytes.len() as i64 > max_size {
        return Err(ApiError::BadRequest(format!(
            "File exceeds maximum size of {} bytes",
            max_size
        )));
    }
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("File is empty".to_string()));
    }

    // A linked form must exist and belong to the same institution
    if let Some(form_id) = readiness_form_id {
        let form = readiness::find_by_id(&state.db, form_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Readiness form {}", form_id)))?;
        if form.institution_id != institution_id {
            return Err(ApiError::Forbidden(
                "Readiness form belongs to another institution".to_string(),
            ));
        }
    }

    let sha256 = content_sha256(&bytes);
    if let Some(existing) = documents::find_by_sha256(&state.db, institution_id, &sha256).await? {
        return Ok(Json(UploadResponse {
            document: existing,
            deduplicated: true,
        }));
    }

    let id = Uuid::new_v4();
    let key = storage_key(institution_id, id);
    state.store.put(&key, &bytes).await?;

    let document = Document {
        id,
        institution_id,
        owner_user_id: auth.user_id,
        file_name,
        content_type,
        size_bytes: bytes.len() as i64,
        sha256,
        storage_key: key.clone(),
        kind,
        readiness_form_id,
        readiness_section_key,
        created_at: String::new(),
    };

    if let Err(e) = documents::insert(&state.db, auth.user_id, &document).await {
        // Metadata insert failed; remove the orphan blob before surfacing
        let _ = state.store.delete(&key).await;
        return Err(e.into());
    }

    state.events.emit(YibaEvent::DocumentUploaded {
        document_id: id,
        institution_id,
        timestamp: chrono::Utc::now(),
    });

    let created = documents::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::Internal("Document vanished after create".to_string()))?;
    Ok(Json(UploadResponse {
        document: created,
        deduplicated: false,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub institution_id: Option<Uuid>,
    pub kind: Option<String>,
}

fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<Document>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// GET /api/documents
pub async fn list_documents(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListDocumentsQuery>,
) -> ApiResult<Json<DocumentListResponse>> {
    require_cap(&auth, Capability::DocumentRead)?;
    let institution_id = scoped_institution(&auth, query.institution_id)?;
    assert_can_read_institution(&state, &auth, institution_id).await?;

    let (documents, total, page) =
        documents::list(&state.db, institution_id, query.kind.as_deref(), query.page).await?;
    Ok(Json(DocumentListResponse {
        documents,
        total,
        page,
        page_size: PAGE_SIZE,
    }))
}

/// GET /api/documents/:id
pub async fn get_document(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Document>> {
    require_cap(&auth, Capability::DocumentRead)?;

    let document = documents::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {}", id)))?;
    assert_can_read_institution(&state, &auth, document.institution_id).await?;

    Ok(Json(document))
}

/// GET /api/documents/:id/download
pub async fn download_document(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<(HeaderMap, Vec<u8>)> {
    require_cap(&auth, Capability::DocumentRead)?;

    let document = documents::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {}", id)))?;
    assert_can_read_institution(&state, &auth, document.institution_id).await?;

    let bytes = state.store.get(&document.storage_key).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&document.content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    let disposition = format!(
        "attachment; filename=\"{}\"",
        document.file_name.replace('"', "_")
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or(HeaderValue::from_static("attachment")),
    );

    Ok((headers, bytes))
}

/// DELETE /api/documents/:id
///
/// Refused while the document sits in an open submission.
pub async fn delete_document(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::DocumentWrite)?;

    let document = documents::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {}", id)))?;
    scoped_institution(&auth, Some(document.institution_id))?;

    if documents::in_open_submission(&state.db, id).await? {
        return Err(ApiError::Conflict(
            "Document is part of an open submission".to_string(),
        ));
    }

    documents::delete(&state.db, auth.user_id, &document).await?;
    state.store.delete(&document.storage_key).await?;

    Ok(Json(serde_json::json!({ "deleted": id })))
}
