//! Notification API handlers (read-only surface plus mark-as-read)

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::AuthenticatedUser;
use crate::notification::{ListNotificationsQuery, MarkReadRequest};
use crate::state::AppState;

/// Unread-count query parameters
#[derive(Debug, Deserialize)]
pub struct UnreadCountQuery {
    pub community_id: Option<Uuid>,
}

/// Unread-count response body
#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

/// List the current user's notifications
pub async fn list_notifications(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListNotificationsQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = app_state
        .notification_service
        .list_notifications(user.user_id, query)
        .await?;
    Ok(Json(page))
}

/// Get one of the current user's notifications
pub async fn get_notification(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let notification = app_state
        .notification_service
        .get_notification(user.user_id, id)
        .await?;
    Ok(Json(notification))
}

/// Mark a single notification as read
pub async fn mark_notification_read(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let notification = app_state
        .notification_service
        .mark_read(user.user_id, id)
        .await?;
    Ok(Json(notification))
}

/// Mark a batch of notifications as read
pub async fn mark_notifications_read(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<MarkReadRequest>,
) -> ApiResult<impl IntoResponse> {
    let notifications = app_state
        .notification_service
        .mark_read_bulk(user.user_id, &request.ids)
        .await?;
    Ok(Json(notifications))
}

/// Count the current user's unread notifications
pub async fn unread_count(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<UnreadCountQuery>,
) -> ApiResult<impl IntoResponse> {
    let count = app_state
        .notification_service
        .unread_count(user.user_id, query.community_id)
        .await?;
    Ok(Json(UnreadCountResponse {
        unread_count: count,
    }))
}
