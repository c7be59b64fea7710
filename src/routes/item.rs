//! Item route definitions

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::handlers::{create_item, delete_item, get_item, list_items, update_item};
use crate::state::AppState;

pub fn item_routes() -> Router<AppState> {
    Router::new()
        .route("/api/items", post(create_item))
        .route("/api/items", get(list_items))
        .route("/api/items/:id", get(get_item))
        .route("/api/items/:id", put(update_item))
        .route("/api/items/:id", delete(delete_item))
}
