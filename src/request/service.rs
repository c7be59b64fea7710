//! Request service layer - borrow-request CRUD

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::concurrency;
use crate::error::{ApiError, ApiResult};
use crate::membership;
use crate::request::{
    CreateRequestRequest, ListRequestsQuery, Request, RequestStatus, UpdateRequestRequest,
};

/// Request service for managing borrow requests
#[derive(Clone)]
pub struct RequestService {
    db_pool: PgPool,
}

impl RequestService {
    /// Create a new request service instance
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Create a request in the Open state
    pub async fn create_request(
        &self,
        actor: Uuid,
        request: CreateRequestRequest,
    ) -> ApiResult<Request> {
        membership::require_active_member(&self.db_pool, request.community_id, actor).await?;

        let created = sqlx::query_as::<_, Request>(
            r#"
            INSERT INTO requests (
                id, community_id, requester_user_id, title, description,
                status, created_at, needed_from, needed_to
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.community_id)
        .bind(actor)
        .bind(&request.title)
        .bind(&request.description)
        .bind(RequestStatus::Open)
        .bind(Utc::now())
        .bind(request.needed_from)
        .bind(request.needed_to)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(created)
    }

    /// Get a single request by ID
    pub async fn get_request(&self, id: Uuid) -> ApiResult<Option<Request>> {
        let request = sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(request)
    }

    /// List requests with filtering and pagination
    pub async fn list_requests(&self, query: ListRequestsQuery) -> ApiResult<Vec<Request>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * limit;

        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM requests WHERE 1=1");

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

        let requests = query_builder
            .build_query_as::<Request>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(requests)
    }

    /// List the actor's own requests
    pub async fn list_my_requests(&self, actor: Uuid) -> ApiResult<Vec<Request>> {
        let requests = sqlx::query_as::<_, Request>(
            "SELECT * FROM requests WHERE requester_user_id = $1 ORDER BY created_at DESC",
        )
        .bind(actor)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(requests)
    }

    /// Update a request. Only Open requests can be updated, only by the
    /// requester or a community manager.
    pub async fn update_request(
        &self,
        actor: Uuid,
        id: Uuid,
        if_match: Option<&str>,
        request: UpdateRequestRequest,
    ) -> ApiResult<Request> {
        let mut tx = self.db_pool.begin().await?;

        let existing =
            sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ApiError::NotFound("Request".to_string()))?;

        let role =
            membership::require_active_member(&mut *tx, existing.community_id, actor).await?;
        if !role.can_manage_community() && existing.requester_user_id != actor {
            return Err(ApiError::Forbidden(
                "User is not allowed to update the request".to_string(),
            ));
        }
        if !concurrency::is_if_match_satisfied(if_match, &existing) {
            return Err(ApiError::PreconditionFailed(
                "Entity tag does not match the current request".to_string(),
            ));
        }
        if existing.status != RequestStatus::Open {
            return Err(ApiError::StateConflict(
                "Request cannot be updated unless open".to_string(),
            ));
        }

        let updated = sqlx::query_as::<_, Request>(
            r#"
            UPDATE requests
            SET title = $1, description = $2, needed_from = $3, needed_to = $4
            WHERE id = $5 AND status = 'open'
            RETURNING *
            "#,
        )
        .bind(&request.title)
        .bind(&request.description)
        .bind(request.needed_from)
        .bind(request.needed_to)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            ApiError::StateConflict("Request cannot be updated unless open".to_string())
        })?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Delete a request. Only Open requests can be deleted.
    pub async fn delete_request(
        &self,
        actor: Uuid,
        id: Uuid,
        if_match: Option<&str>,
    ) -> ApiResult<()> {
        let mut tx = self.db_pool.begin().await?;

        let existing =
            sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ApiError::NotFound("Request".to_string()))?;

        let role =
            membership::require_active_member(&mut *tx, existing.community_id, actor).await?;
        if !role.can_manage_community() && existing.requester_user_id != actor {
            return Err(ApiError::Forbidden(
                "User is not allowed to delete the request".to_string(),
            ));
        }
        if !concurrency::is_if_match_satisfied(if_match, &existing) {
            return Err(ApiError::PreconditionFailed(
                "Entity tag does not match the current request".to_string(),
            ));
        }

        let deleted = sqlx::query("DELETE FROM requests WHERE id = $1 AND status = 'open'")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(ApiError::StateConflict(
                "Request cannot be deleted unless open".to_string(),
            ));
        }

        tx.commit().await?;

        Ok(())
    }
}
