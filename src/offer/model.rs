//! Offer models and data structures

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::concurrency::{self, TaggedEntity};

/// An offer to lend an item, optionally answering a borrow request.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Offer {
    pub id: Uuid,
    pub community_id: Uuid,
    pub offerer_user_id: Uuid,
    pub request_id: Option<Uuid>,
    pub item_id: Uuid,
    pub message: Option<String>,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
}

/// Offer lifecycle status. Every non-Open status is terminal.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "offer_status", rename_all = "lowercase")]
pub enum OfferStatus {
    Open,
    Accepted,
    Rejected,
    Withdrawn,
}

impl TaggedEntity for Offer {
    fn scalar_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.to_string()),
            ("community_id", self.community_id.to_string()),
            ("offerer_user_id", self.offerer_user_id.to_string()),
            ("request_id", concurrency::opt(&self.request_id)),
            ("item_id", self.item_id.to_string()),
            ("message", concurrency::opt(&self.message)),
            ("status", (self.status as u8).to_string()),
            ("created_at", concurrency::timestamp(&self.created_at)),
        ]
    }
}

/// Request DTO for creating an offer
#[derive(Debug, Deserialize)]
pub struct CreateOfferRequest {
    pub item_id: Uuid,
    pub request_id: Option<Uuid>,
    pub message: Option<String>,
}

/// Request DTO for updating an offer; status cannot be changed via update.
#[derive(Debug, Deserialize)]
pub struct UpdateOfferRequest {
    pub message: Option<String>,
}

/// Request DTO for accepting an offer. The borrower is implied by the
/// linked request when there is one; a direct offer needs it spelled out.
#[derive(Debug, Deserialize, Default)]
pub struct AcceptOfferRequest {
    pub borrower_user_id: Option<Uuid>,
}

/// Query parameters for listing offers
#[derive(Debug, Deserialize)]
pub struct ListOffersQuery {
    pub community_id: Option<Uuid>,
    pub status: Option<OfferStatus>,
    pub request_id: Option<Uuid>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}
