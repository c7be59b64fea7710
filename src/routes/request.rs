//! Borrow-request route definitions

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::handlers::{
    create_request, delete_request, get_request, list_my_requests, list_requests, update_request,
};
use crate::state::AppState;

pub fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/api/requests", post(create_request))
        .route("/api/requests", get(list_requests))
        .route("/api/requests/me", get(list_my_requests))
        .route("/api/requests/:id", get(get_request))
        .route("/api/requests/:id", put(update_request))
        .route("/api/requests/:id", delete(delete_request))
}
