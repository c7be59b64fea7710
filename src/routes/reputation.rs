//! Reputation route definitions

use axum::{routing::get, Router};

use crate::handlers::get_reputation;
use crate::state::AppState;

pub fn reputation_routes() -> Router<AppState> {
    Router::new().route(
        "/api/communities/:community_id/reputation/:user_id",
        get(get_reputation),
    )
}
