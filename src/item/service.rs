//! Item service layer - item CRUD constrained by the lending state machine

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::concurrency;
use crate::error::{ApiError, ApiResult};
use crate::item::{CreateItemRequest, Item, ItemStatus, ListItemsQuery, UpdateItemRequest};
use crate::membership;

/// Item service for managing items
#[derive(Clone)]
pub struct ItemService {
    db_pool: PgPool,
}

impl ItemService {
    /// Create a new item service instance
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Create an item in the Available state
    pub async fn create_item(&self, actor: Uuid, request: CreateItemRequest) -> ApiResult<Item> {
        membership::require_active_member(&self.db_pool, request.community_id, actor).await?;

        let item = sqlx::query_as::<_, Item>(
            r#"
            INSERT INTO items (
                id, community_id, owner_user_id, name, description, category,
                status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.community_id)
        .bind(actor)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.category)
        .bind(ItemStatus::Available)
        .bind(Utc::now())
        .fetch_one(&self.db_pool)
        .await?;

        Ok(item)
    }

    /// Get a single item by ID
    pub async fn get_item(&self, id: Uuid) -> ApiResult<Option<Item>> {
        let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(item)
    }

    /// List items with filtering and pagination
    pub async fn list_items(&self, query: ListItemsQuery) -> ApiResult<Vec<Item>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * limit;

        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM items WHERE 1=1");

        if let Some(community_id) = query.community_id {
            query_builder.push(" AND community_id = ");
            query_builder.push_bind(community_id);
        }
        if let Some(status) = query.status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status);
        }

        query_builder.push(" ORDER BY created_at DESC LIMIT ");
        query_builder.push_bind(limit as i64);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset as i64);

        let items = query_builder
            .build_query_as::<Item>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(items)
    }

    /// Update an item. Only Available items can be updated, only by the
    /// owner or a community manager, and only when the If-Match header (if
    /// present) matches the item's current entity tag.
    pub async fn update_item(
        &self,
        actor: Uuid,
        id: Uuid,
        if_match: Option<&str>,
        request: UpdateItemRequest,
    ) -> ApiResult<Item> {
        let mut tx = self.db_pool.begin().await?;

        let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound("Item".to_string()))?;

        let role = membership::require_active_member(&mut *tx, item.community_id, actor).await?;
        if !role.can_manage_community() && item.owner_user_id != actor {
            return Err(ApiError::Forbidden(
                "User is not allowed to update the item".to_string(),
            ));
        }
        if !concurrency::is_if_match_satisfied(if_match, &item) {
            return Err(ApiError::PreconditionFailed(
                "Entity tag does not match the current item".to_string(),
            ));
        }
        if item.status != ItemStatus::Available {
            return Err(ApiError::StateConflict(
                "Item cannot be updated unless available".to_string(),
            ));
        }

        let updated = sqlx::query_as::<_, Item>(
            r#"
            UPDATE items
            SET name = $1, description = $2, category = $3, updated_at = $4
            WHERE id = $5 AND status = 'available'
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.category)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            ApiError::StateConflict("Item cannot be updated unless available".to_string())
        })?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Delete an item. Only Available items can be deleted.
    pub async fn delete_item(&self, actor: Uuid, id: Uuid, if_match: Option<&str>) -> ApiResult<()> {
        let mut tx = self.db_pool.begin().await?;

        let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound("Item".to_string()))?;

        let role = membership::require_active_member(&mut *tx, item.community_id, actor).await?;
        if !role.can_manage_community() && item.owner_user_id != actor {
            return Err(ApiError::Forbidden(
                "User is not allowed to delete the item".to_string(),
            ));
        }
        if !concurrency::is_if_match_satisfied(if_match, &item) {
            return Err(ApiError::PreconditionFailed(
                "Entity tag does not match the current item".to_string(),
            ));
        }

        let deleted = sqlx::query("DELETE FROM items WHERE id = $1 AND status = 'available'")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(ApiError::StateConflict(
                "Item cannot be deleted unless available".to_string(),
            ));
        }

        tx.commit().await?;

        Ok(())
    }
}
