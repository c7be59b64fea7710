//! Notification route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    get_notification, list_notifications, mark_notification_read, mark_notifications_read,
    unread_count,
};
use crate::state::AppState;

pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read", post(mark_notifications_read))
        .route("/api/notifications/:id", get(get_notification))
        .route("/api/notifications/:id/read", post(mark_notification_read))
}
