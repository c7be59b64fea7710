//! Offer API handlers

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::concurrency;
use crate::error::{ApiError, ApiResult};
use crate::handlers::item::if_match_header;
use crate::middleware::AuthenticatedUser;
use crate::offer::{AcceptOfferRequest, CreateOfferRequest, ListOffersQuery, UpdateOfferRequest};
use crate::state::AppState;

/// Create a new offer
pub async fn create_offer(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateOfferRequest>,
) -> ApiResult<Response> {
    let offer = app_state
        .offer_service
        .create_offer(user.user_id, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/offers/{}", offer.id))],
        Json(offer),
    )
        .into_response())
}

/// Get a single offer; the response carries the entity tag.
pub async fn get_offer(
    State(app_state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let offer = app_state
        .offer_service
        .get_offer(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Offer".to_string()))?;

    let tag = concurrency::compute(&offer);
    Ok(([(header::ETAG, tag)], Json(offer)).into_response())
}

/// List offers with filtering and pagination
pub async fn list_offers(
    State(app_state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<ListOffersQuery>,
) -> ApiResult<impl IntoResponse> {
    let offers = app_state.offer_service.list_offers(query).await?;
    Ok(Json(offers))
}

/// List the current user's offers
pub async fn list_my_offers(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListOffersQuery>,
) -> ApiResult<impl IntoResponse> {
    let offers = app_state
        .offer_service
        .list_my_offers(user.user_id, query)
        .await?;
    Ok(Json(offers))
}

/// Update an offer, honoring the If-Match precondition
pub async fn update_offer(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateOfferRequest>,
) -> ApiResult<impl IntoResponse> {
    let if_match = if_match_header(&headers);
    let offer = app_state
        .offer_service
        .update_offer(user.user_id, id, if_match, request)
        .await?;

    Ok(Json(offer))
}

/// Delete an offer, honoring the If-Match precondition
pub async fn delete_offer(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let if_match = if_match_header(&headers);
    app_state
        .offer_service
        .delete_offer(user.user_id, id, if_match)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Accept an offer; responds with the loan created by the acceptance.
pub async fn accept_offer(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    body: Option<Json<AcceptOfferRequest>>,
) -> ApiResult<impl IntoResponse> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let loan = app_state
        .offer_service
        .accept_offer(user.user_id, id, request)
        .await?;

    Ok(Json(loan))
}

/// Reject an offer
pub async fn reject_offer(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let offer = app_state
        .offer_service
        .reject_offer(user.user_id, id)
        .await?;
    Ok(Json(offer))
}

/// Withdraw an offer
pub async fn withdraw_offer(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let offer = app_state
        .offer_service
        .withdraw_offer(user.user_id, id)
        .await?;
    Ok(Json(offer))
}
