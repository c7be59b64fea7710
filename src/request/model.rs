//! Request models and data structures

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::concurrency::{self, TaggedEntity};

/// A member's ask to borrow something from the community.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Request {
    pub id: Uuid,
    pub community_id: Uuid,
    pub requester_user_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub needed_from: Option<DateTime<Utc>>,
    pub needed_to: Option<DateTime<Utc>>,
}

/// Request lifecycle status. Closed is terminal.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "request_status", rename_all = "lowercase")]
pub enum RequestStatus {
    Open,
    Accepted,
    Closed,
}

impl TaggedEntity for Request {
    fn scalar_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.to_string()),
            ("community_id", self.community_id.to_string()),
            ("requester_user_id", self.requester_user_id.to_string()),
            ("title", self.title.clone()),
            ("description", self.description.clone()),
            ("status", (self.status as u8).to_string()),
            ("created_at", concurrency::timestamp(&self.created_at)),
            ("needed_from", concurrency::opt_timestamp(&self.needed_from)),
            ("needed_to", concurrency::opt_timestamp(&self.needed_to)),
        ]
    }
}

/// Request DTO for creating a request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRequestRequest {
    pub community_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub needed_from: Option<DateTime<Utc>>,
    pub needed_to: Option<DateTime<Utc>>,
}

/// Request DTO for updating a request; status cannot be changed via update.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRequestRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub needed_from: Option<DateTime<Utc>>,
    pub needed_to: Option<DateTime<Utc>>,
}

/// Query parameters for listing requests
#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    pub community_id: Option<Uuid>,
    pub status: Option<RequestStatus>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}
