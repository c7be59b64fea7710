//! Reputation API handlers

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

/// Get a user's reputation profile in a community
pub async fn get_reputation(
    State(app_state): State<AppState>,
    _user: AuthenticatedUser,
    Path((community_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    let profile = app_state
        .reputation_service
        .get_profile(community_id, user_id)
        .await?;
    Ok(Json(profile))
}
