//! Notification endpoints

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::db::models::Notification;
use yiba_common::Capability;

use super::require_cap;
use crate::db::notifications;
use crate::error::ApiResult;
use crate::pagination::PAGE_SIZE;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default)]
    pub unread_only: bool,
}

fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<Notification>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListNotificationsQuery>,
) -> ApiResult<Json<NotificationListResponse>> {
    require_cap(&auth, Capability::NotificationRead)?;

    let (notifications, total, page) =
        notifications::list(&state.db, auth.user_id, query.unread_only, query.page).await?;
    Ok(Json(NotificationListResponse {
        notifications,
        total,
        page,
        page_size: PAGE_SIZE,
    }))
}

/// POST /api/notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::NotificationRead)?;

    notifications::mark_read(&state.db, auth.user_id, id).await?;
    Ok(Json(serde_json::json!({ "read": id })))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    require_cap(&auth, Capability::NotificationRead)?;

    let count = notifications::unread_count(&state.db, auth.user_id).await?;
    Ok(Json(serde_json::json!({ "unread": count })))
}
