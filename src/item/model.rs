//! Item models and data structures

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::concurrency::{self, TaggedEntity};

/// A physical item a member lends out.
///
/// Once an offer or loan touches the item, its status is mutated only by
/// the lending state machine.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Item {
    pub id: Uuid,
    pub community_id: Uuid,
    pub owner_user_id: Uuid,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Item lifecycle status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "item_status", rename_all = "lowercase")]
pub enum ItemStatus {
    Available,
    Reserved,
    InLoan,
}

impl TaggedEntity for Item {
    fn scalar_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.to_string()),
            ("community_id", self.community_id.to_string()),
            ("owner_user_id", self.owner_user_id.to_string()),
            ("name", self.name.clone()),
            ("description", self.description.clone()),
            ("category", concurrency::opt(&self.category)),
            ("status", (self.status as u8).to_string()),
            ("created_at", concurrency::timestamp(&self.created_at)),
            ("updated_at", concurrency::opt_timestamp(&self.updated_at)),
        ]
    }
}

/// Request DTO for creating an item
#[derive(Debug, Deserialize, Validate)]
pub struct CreateItemRequest {
    pub community_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
}

/// Request DTO for updating an item; status cannot be changed via update.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateItemRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
}

/// Query parameters for listing items
#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub community_id: Option<Uuid>,
    pub status: Option<ItemStatus>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}
