//! Reputation models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Point awards for completed loans
pub mod weights {
    pub const LEND_POINTS: i32 = 5;
    pub const RETURN_POINTS: i32 = 2;
    pub const ON_TIME_RETURN_BONUS: i32 = 1;
}

/// Per-(community, user) reputation counters
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ReputationProfile {
    pub id: Uuid,
    pub community_id: Uuid,
    pub user_id: Uuid,
    pub score: i32,
    pub lend_count: i32,
    pub return_count: i32,
    pub on_time_return_count: i32,
    pub updated_at: DateTime<Utc>,
}
