//! Item API handlers

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::concurrency;
use crate::error::{ApiError, ApiResult};
use crate::item::{CreateItemRequest, ListItemsQuery, UpdateItemRequest};
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

/// Create a new item
pub async fn create_item(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateItemRequest>,
) -> ApiResult<Response> {
    request.validate()?;

    let item = app_state
        .item_service
        .create_item(user.user_id, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/items/{}", item.id))],
        Json(item),
    )
        .into_response())
}

/// Get a single item; the response carries the item's entity tag.
pub async fn get_item(
    State(app_state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let item = app_state
        .item_service
        .get_item(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Item".to_string()))?;

    let tag = concurrency::compute(&item);
    Ok(([(header::ETAG, tag)], Json(item)).into_response())
}

/// List items with filtering and pagination
pub async fn list_items(
    State(app_state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<ListItemsQuery>,
) -> ApiResult<impl IntoResponse> {
    let items = app_state.item_service.list_items(query).await?;
    Ok(Json(items))
}

/// Update an item, honoring the If-Match precondition
pub async fn update_item(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateItemRequest>,
) -> ApiResult<impl IntoResponse> {
    request.validate()?;

    let if_match = if_match_header(&headers);
    let item = app_state
        .item_service
        .update_item(user.user_id, id, if_match, request)
        .await?;

    Ok(Json(item))
}

/// Delete an item, honoring the If-Match precondition
pub async fn delete_item(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let if_match = if_match_header(&headers);
    app_state
        .item_service
        .delete_item(user.user_id, id, if_match)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub(crate) fn if_match_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::IF_MATCH).and_then(|h| h.to_str().ok())
}
