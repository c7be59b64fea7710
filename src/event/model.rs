//! Event log models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Entity kinds that appear in the event log
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "event_entity", rename_all = "lowercase")]
pub enum EventEntity {
    Item,
    Request,
    Offer,
    Loan,
}

/// Immutable record of one committed domain change.
///
/// Ordering key for consumers is `(created_at, id)`; the id breaks
/// same-timestamp ties deterministically.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Event {
    pub id: Uuid,
    pub community_id: Uuid,
    pub actor_user_id: Uuid,
    pub entity_type: EventEntity,
    pub entity_id: Uuid,
    pub action: String,
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Action tags written by the lending state machine.
pub mod actions {
    pub const OFFER_CREATED: &str = "OfferCreated";
    pub const OFFER_ACCEPTED: &str = "OfferAccepted";
    pub const OFFER_REJECTED: &str = "OfferRejected";
    pub const OFFER_WITHDRAWN: &str = "OfferWithdrawn";
    pub const ITEM_RESERVED: &str = "ItemReserved";
    pub const ITEM_IN_LOAN: &str = "ItemInLoan";
    pub const ITEM_AVAILABLE: &str = "ItemAvailable";
    pub const LOAN_RESERVED: &str = "LoanReserved";
    pub const LOAN_STARTED: &str = "LoanStarted";
    pub const LOAN_RETURN_REQUESTED: &str = "LoanReturnRequested";
    pub const LOAN_RETURN_CANCELED: &str = "LoanReturnCanceled";
    pub const LOAN_RETURNED: &str = "LoanReturned";
    pub const REQUEST_ACCEPTED: &str = "RequestAccepted";
    pub const REQUEST_CLOSED: &str = "RequestClosed";
}
