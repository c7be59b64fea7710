//! Loan route definitions

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::handlers::{
    cancel_return, confirm_return, create_loan, delete_loan, get_loan, list_loans, request_return,
    start_loan, update_loan,
};
use crate::state::AppState;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans", post(create_loan))
        .route("/api/loans", get(list_loans))
        .route("/api/loans/:id", get(get_loan))
        .route("/api/loans/:id", put(update_loan))
        .route("/api/loans/:id", delete(delete_loan))
        .route("/api/loans/:id/start", post(start_loan))
        .route("/api/loans/:id/return-request", post(request_return))
        .route("/api/loans/:id/return-confirm", post(confirm_return))
        .route("/api/loans/:id/return-cancel", post(cancel_return))
}
