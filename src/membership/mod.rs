//! Community membership lookups
//!
//! Memberships are owned by the (external) membership service; the lending
//! core only reads them for permission checks.

use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Membership role within a community
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "membership_role", rename_all = "lowercase")]
pub enum MembershipRole {
    Member,
    Moderator,
    Owner,
}

impl MembershipRole {
    /// Owners and moderators can manage any entity in their community.
    pub fn can_manage_community(&self) -> bool {
        matches!(self, MembershipRole::Owner | MembershipRole::Moderator)
    }
}

/// Load the actor's active membership role in a community, or fail with
/// Forbidden when the actor is not an active member.
pub async fn require_active_member<'e, E>(
    executor: E,
    community_id: Uuid,
    user_id: Uuid,
) -> ApiResult<MembershipRole>
where
    E: PgExecutor<'e>,
{
    let role = sqlx::query_scalar::<_, MembershipRole>(
        r#"
        SELECT role FROM memberships
        WHERE community_id = $1 AND user_id = $2 AND status = 'active'
        "#,
    )
    .bind(community_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?;

    role.ok_or_else(|| ApiError::Forbidden("User is not a member of the community".to_string()))
}

/// Check active membership without failing.
pub async fn is_active_member<'e, E>(
    executor: E,
    community_id: Uuid,
    user_id: Uuid,
) -> ApiResult<bool>
where
    E: PgExecutor<'e>,
{
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM memberships
            WHERE community_id = $1 AND user_id = $2 AND status = 'active'
        )
        "#,
    )
    .bind(community_id)
    .bind(user_id)
    .fetch_one(executor)
    .await?;

    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_manage_community() {
        assert!(MembershipRole::Owner.can_manage_community());
        assert!(MembershipRole::Moderator.can_manage_community());
        assert!(!MembershipRole::Member.can_manage_community());
    }
}
