//! Settings endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use yiba_common::api::types::AuthUser;
use yiba_common::db::settings;
use yiba_common::Capability;

use super::require_cap;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /api/settings
pub async fn list_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::SettingsManage)?;

    let rows = settings::list_settings(&state.db).await?;
    let mut map = serde_json::Map::new();
    for (key, value) in rows {
        map.insert(key, value.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null));
    }
    Ok(Json(serde_json::Value::Object(map)))
}

#[derive(Debug, Deserialize)]
pub struct PutSettingRequest {
    pub value: String,
}

/// PUT /api/settings/:key
pub async fn put_setting(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(key): Path<String>,
    Json(request): Json<PutSettingRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::SettingsManage)?;

    // Only known keys are writable; a typo must not create a dead row
    if !settings::setting_exists(&state.db, &key).await? {
        return Err(ApiError::NotFound(format!("Setting {}", key)));
    }

    settings::put_setting(&state.db, &key, &request.value).await?;
    Ok(Json(serde_json::json!({ "key": key, "value": request.value })))
}
