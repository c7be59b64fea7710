//! Offer route definitions

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::handlers::{
    accept_offer, create_offer, delete_offer, get_offer, list_my_offers, list_offers,
    reject_offer, update_offer, withdraw_offer,
};
use crate::state::AppState;

pub fn offer_routes() -> Router<AppState> {
    Router::new()
        .route("/api/offers", post(create_offer))
        .route("/api/offers", get(list_offers))
        .route("/api/offers/me", get(list_my_offers))
        .route("/api/offers/:id", get(get_offer))
        .route("/api/offers/:id", put(update_offer))
        .route("/api/offers/:id", delete(delete_offer))
        .route("/api/offers/:id/accept", post(accept_offer))
        .route("/api/offers/:id/reject", post(reject_offer))
        .route("/api/offers/:id/withdraw", post(withdraw_offer))
}
