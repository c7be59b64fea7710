//! Borrow-request API handlers

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
use crate::handlers::item::if_match_header;
use crate::middleware::AuthenticatedUser;
use crate::request::{CreateRequestRequest, ListRequestsQuery, UpdateRequestRequest};
use crate::state::AppState;

/// Create a new borrow request
pub async fn create_request(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateRequestRequest>,
) -> ApiResult<Response> {
    request.validate()?;

    let created = app_state
        .request_service
        .create_request(user.user_id, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/requests/{}", created.id))],
        Json(created),
    )
        .into_response())
}

/// Get a single request; the response carries the entity tag.
pub async fn get_request(
    State(app_state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let request = app_state
        .request_service
        .get_request(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Request".to_string()))?;

    let tag = concurrency::compute(&request);
    Ok(([(header::ETAG, tag)], Json(request)).into_response())
}

/// List requests with filtering and pagination
pub async fn list_requests(
    State(app_state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<ListRequestsQuery>,
) -> ApiResult<impl IntoResponse> {
    let requests = app_state.request_service.list_requests(query).await?;
    Ok(Json(requests))
}

/// List the current user's requests
pub async fn list_my_requests(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<impl IntoResponse> {
    let requests = app_state
        .request_service
        .list_my_requests(user.user_id)
        .await?;
    Ok(Json(requests))
}

/// Update a request, honoring the If-Match precondition
pub async fn update_request(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateRequestRequest>,
) -> ApiResult<impl IntoResponse> {
    request.validate()?;

    let if_match = if_match_header(&headers);
    let updated = app_state
        .request_service
        .update_request(user.user_id, id, if_match, request)
        .await?;

    Ok(Json(updated))
}

/// Delete a request, honoring the If-Match precondition
pub async fn delete_request(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let if_match = if_match_header(&headers);
    app_state
        .request_service
        .delete_request(user.user_id, id, if_match)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
