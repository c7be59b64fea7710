//! Reputation ledger updates and reads

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::reputation::{weights, ReputationProfile};

/// Apply the reputation effects of a confirmed return inside the caller's
/// transaction: the lender gets lend credit, the borrower gets return
/// credit plus an on-time bonus when applicable. Profiles are created
/// lazily at zero on first touch.
pub async fn apply_return(
    tx: &mut Transaction<'_, Postgres>,
    community_id: Uuid,
    lender_user_id: Uuid,
    borrower_user_id: Uuid,
    on_time: bool,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO reputation_profiles (
            id, community_id, user_id, score, lend_count, return_count,
            on_time_return_count, updated_at
        )
        VALUES ($1, $2, $3, $4, 1, 0, 0, $5)
        ON CONFLICT (community_id, user_id) DO UPDATE
        SET score = reputation_profiles.score + $4,
            lend_count = reputation_profiles.lend_count + 1,
            updated_at = $5
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(community_id)
    .bind(lender_user_id)
    .bind(weights::LEND_POINTS)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    let borrower_points = if on_time {
        weights::RETURN_POINTS + weights::ON_TIME_RETURN_BONUS
    } else {
        weights::RETURN_POINTS
    };
    let on_time_increment: i32 = if on_time { 1 } else { 0 };

    sqlx::query(
        r#"
        INSERT INTO reputation_profiles (
            id, community_id, user_id, score, lend_count, return_count,
            on_time_return_count, updated_at
        )
        VALUES ($1, $2, $3, $4, 0, 1, $5, $6)
        ON CONFLICT (community_id, user_id) DO UPDATE
        SET score = reputation_profiles.score + $4,
            return_count = reputation_profiles.return_count + 1,
            on_time_return_count = reputation_profiles.on_time_return_count + $5,
            updated_at = $6
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(community_id)
    .bind(borrower_user_id)
    .bind(borrower_points)
    .bind(on_time_increment)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Reputation read surface
#[derive(Clone)]
pub struct ReputationService {
    db_pool: PgPool,
}

impl ReputationService {
    /// Create a new reputation service instance
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Get a user's profile in a community; users with no completed loans
    /// read as a zero profile.
    pub async fn get_profile(
        &self,
        community_id: Uuid,
        user_id: Uuid,
    ) -> ApiResult<ReputationProfile> {
        let profile = sqlx::query_as::<_, ReputationProfile>(
            "SELECT * FROM reputation_profiles WHERE community_id = $1 AND user_id = $2",
        )
        .bind(community_id)
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(profile.unwrap_or(ReputationProfile {
            id: Uuid::nil(),
            community_id,
            user_id,
            score: 0,
            lend_count: 0,
            return_count: 0,
            on_time_return_count: 0,
            updated_at: Utc::now(),
        }))
    }
}
