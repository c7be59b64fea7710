//! Notification read surface
//!
//! Notifications are read-only for clients apart from marking them read.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::notification::{
    ListNotificationsQuery, Notification, PagedNotifications,
};

/// Notification service for the client-facing surface
#[derive(Clone)]
pub struct NotificationService {
    db_pool: PgPool,
}

impl NotificationService {
    /// Create a new notification service instance
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// List the actor's notifications, newest first
    pub async fn list_notifications(
        &self,
        actor: Uuid,
        query: ListNotificationsQuery,
    ) -> ApiResult<PagedNotifications> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * limit;
        let unread_only = query.unread_only.unwrap_or(false);

        let mut count_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM notifications WHERE recipient_user_id = ");
        count_builder.push_bind(actor);
        if let Some(community_id) = query.community_id {
            count_builder.push(" AND community_id = ");
            count_builder.push_bind(community_id);
        }
        if unread_only {
            count_builder.push(" AND read_at IS NULL");
        }
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.db_pool)
            .await?;

        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM notifications WHERE recipient_user_id = ");
        query_builder.push_bind(actor);
        if let Some(community_id) = query.community_id {
            query_builder.push(" AND community_id = ");
            query_builder.push_bind(community_id);
        }
        if unread_only {
            query_builder.push(" AND read_at IS NULL");
        }
        query_builder.push(" ORDER BY created_at DESC LIMIT ");
        query_builder.push_bind(limit as i64);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset as i64);

        let items = query_builder
            .build_query_as::<Notification>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(PagedNotifications {
            items,
            page,
            limit,
            total,
        })
    }

    /// Get one of the actor's notifications by ID
    pub async fn get_notification(&self, actor: Uuid, id: Uuid) -> ApiResult<Notification> {
        let notification = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE id = $1 AND recipient_user_id = $2",
        )
        .bind(id)
        .bind(actor)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("Notification".to_string()))?;

        Ok(notification)
    }

    /// Mark a single notification as read
    pub async fn mark_read(&self, actor: Uuid, id: Uuid) -> ApiResult<Notification> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            UPDATE notifications
            SET read_at = COALESCE(read_at, $1), status = 'delivered'
            WHERE id = $2 AND recipient_user_id = $3
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .bind(actor)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("Notification".to_string()))?;

        Ok(notification)
    }

    /// Mark a set of the actor's notifications as read; notifications that
    /// do not exist or belong to someone else are silently skipped.
    pub async fn mark_read_bulk(&self, actor: Uuid, ids: &[Uuid]) -> ApiResult<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            UPDATE notifications
            SET read_at = COALESCE(read_at, $1), status = 'delivered'
            WHERE id = ANY($2) AND recipient_user_id = $3
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(ids)
        .bind(actor)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(notifications)
    }

    /// Count the actor's unread notifications
    pub async fn unread_count(&self, actor: Uuid, community_id: Option<Uuid>) -> ApiResult<i64> {
        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "SELECT COUNT(*) FROM notifications WHERE read_at IS NULL AND recipient_user_id = ",
        );
        query_builder.push_bind(actor);
        if let Some(community_id) = community_id {
            query_builder.push(" AND community_id = ");
            query_builder.push_bind(community_id);
        }

        let count: i64 = query_builder
            .build_query_scalar()
            .fetch_one(&self.db_pool)
            .await?;

        Ok(count)
    }
}
