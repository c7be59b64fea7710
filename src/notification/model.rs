//! Notification models and data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::EventEntity;

/// Notification kinds, named recipient-first so the dispatcher's recipient
/// resolution stays exhaustive.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "notification_kind", rename_all = "lowercase")]
pub enum NotificationKind {
    OfferReceivedToRequester,
    OfferAcceptedToLender,
    OfferRejectedToLender,
    OfferWithdrawnToRequester,
    LoanReservedToBorrower,
    LoanReservedToLender,
    LoanStartedToBorrower,
    LoanReturnRequestedToLender,
    LoanReturnConfirmedToBorrower,
    LoanReturnConfirmedToLender,
    LoanReturnCanceledToLender,
}

/// Delivery status of a notification row
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "notification_status", rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Delivered,
}

/// A per-user notification fanned out from one event.
///
/// `(event_id, kind, recipient_user_id)` is unique: reprocessing a batch
/// can never produce a duplicate.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_user_id: Uuid,
    pub community_id: Uuid,
    pub kind: NotificationKind,
    pub event_id: Uuid,
    pub entity_type: EventEntity,
    pub entity_id: Uuid,
    pub payload: Option<String>,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// The dispatcher's durable cursor: the last event it has fully processed.
#[derive(Debug, sqlx::FromRow, Clone)]
pub struct DispatchState {
    pub id: String,
    pub last_processed_at: DateTime<Utc>,
    pub last_processed_event_id: Uuid,
}

/// Query parameters for listing notifications
#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub community_id: Option<Uuid>,
    pub unread_only: Option<bool>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

/// Request DTO for bulk mark-as-read
#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub ids: Vec<Uuid>,
}

/// Paged notification listing
#[derive(Debug, Serialize)]
pub struct PagedNotifications {
    pub items: Vec<Notification>,
    pub page: i32,
    pub limit: i32,
    pub total: i64,
}
