//! Loan API handlers

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
use crate::loan::{CreateLoanRequest, ListLoansQuery, UpdateLoanRequest};
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

/// Create a loan directly (the item owner lends without an offer)
pub async fn create_loan(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateLoanRequest>,
) -> ApiResult<Response> {
    let loan = app_state
        .loan_service
        .create_loan(user.user_id, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/loans/{}", loan.id))],
        Json(loan),
    )
        .into_response())
}

/// Get a single loan; the response carries the entity tag.
pub async fn get_loan(
    State(app_state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let loan = app_state
        .loan_service
        .get_loan(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Loan".to_string()))?;

    let tag = concurrency::compute(&loan);
    Ok(([(header::ETAG, tag)], Json(loan)).into_response())
}

/// List loans with filtering and pagination
pub async fn list_loans(
    State(app_state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<ListLoansQuery>,
) -> ApiResult<impl IntoResponse> {
    let loans = app_state.loan_service.list_loans(query).await?;
    Ok(Json(loans))
}

/// Update a loan's schedule, honoring the If-Match precondition
pub async fn update_loan(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateLoanRequest>,
) -> ApiResult<impl IntoResponse> {
    let if_match = if_match_header(&headers);
    let loan = app_state
        .loan_service
        .update_loan(user.user_id, id, if_match, request)
        .await?;

    Ok(Json(loan))
}

/// Delete a reserved loan, honoring the If-Match precondition
pub async fn delete_loan(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let if_match = if_match_header(&headers);
    app_state
        .loan_service
        .delete_loan(user.user_id, id, if_match)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Start a reserved loan
pub async fn start_loan(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let loan = app_state.loan_service.start_loan(user.user_id, id).await?;
    Ok(Json(loan))
}

/// Borrower requests the return
pub async fn request_return(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let loan = app_state
        .loan_service
        .request_return(user.user_id, id)
        .await?;
    Ok(Json(loan))
}

/// Lender confirms the return
pub async fn confirm_return(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let loan = app_state
        .loan_service
        .confirm_return(user.user_id, id)
        .await?;
    Ok(Json(loan))
}

/// Borrower cancels a pending return request
pub async fn cancel_return(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let loan = app_state
        .loan_service
        .cancel_return(user.user_id, id)
        .await?;
    Ok(Json(loan))
}
