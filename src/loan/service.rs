//! Loan service layer - loan lifecycle from reservation to confirmed return
//!
//! Every transition runs in one transaction: the loan row, the item row,
//! the event rows and (on return) the reputation rows move together or not
//! at all.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::concurrency;
use crate::error::{ApiError, ApiResult};
use crate::event::{actions, insert_event, new_event, EventEntity};
use crate::item::Item;
use crate::loan::{CreateLoanRequest, ListLoansQuery, Loan, LoanStatus, UpdateLoanRequest};
use crate::membership::{self, MembershipRole};
use crate::reputation;
use crate::request::RequestStatus;

/// Loan service for managing loan lifecycle
#[derive(Clone)]
pub struct LoanService {
    db_pool: PgPool,
}

impl LoanService {
    /// Create a new loan service instance
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Create a loan directly, without going through an offer.
    ///
    /// The item owner becomes the lender and the item is reserved in the
    /// same transaction, so a directly created loan holds the same
    /// "one active loan per item" invariant as an accepted offer.
    pub async fn create_loan(&self, actor: Uuid, request: CreateLoanRequest) -> ApiResult<Loan> {
        let mut tx = self.db_pool.begin().await?;

        let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = $1")
            .bind(request.item_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::Validation("ItemId does not exist".to_string()))?;

        let lender_user_id = item.owner_user_id;
        if actor != lender_user_id && actor != request.borrower_user_id {
            return Err(ApiError::Forbidden(
                "User is not allowed to create the loan".to_string(),
            ));
        }

        membership::require_active_member(&mut *tx, item.community_id, lender_user_id).await?;
        membership::require_active_member(&mut *tx, item.community_id, request.borrower_user_id)
            .await?;

        if let Some(request_id) = request.request_id {
            let community_id = sqlx::query_scalar::<_, Uuid>(
                "SELECT community_id FROM requests WHERE id = $1",
            )
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::Validation("RequestId does not exist".to_string()))?;
            if community_id != item.community_id {
                return Err(ApiError::Validation(
                    "RequestId does not belong to the community".to_string(),
                ));
            }
        }

        let item_updated = sqlx::query(
            "UPDATE items SET status = 'reserved' WHERE id = $1 AND status = 'available'",
        )
        .bind(item.id)
        .execute(&mut *tx)
        .await?;
        if item_updated.rows_affected() == 0 {
            return Err(ApiError::StateConflict("Item is not available".to_string()));
        }

        let now = Utc::now();
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (
                id, community_id, item_id, lender_user_id, borrower_user_id,
                request_id, status, start_at, due_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(item.community_id)
        .bind(item.id)
        .bind(lender_user_id)
        .bind(request.borrower_user_id)
        .bind(request.request_id)
        .bind(LoanStatus::Reserved)
        .bind(now)
        .bind(request.due_at)
        .fetch_one(&mut *tx)
        .await?;

        let events = [
            new_event(
                loan.community_id,
                actor,
                EventEntity::Loan,
                loan.id,
                actions::LOAN_RESERVED,
                now,
            ),
            new_event(
                loan.community_id,
                actor,
                EventEntity::Item,
                item.id,
                actions::ITEM_RESERVED,
                now,
            ),
        ];
        for event in &events {
            insert_event(&mut tx, event).await?;
        }

        tx.commit().await?;

        Ok(loan)
    }

    /// Get a single loan by ID
    pub async fn get_loan(&self, id: Uuid) -> ApiResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(loan)
    }

    /// List loans with filtering and pagination
    pub async fn list_loans(&self, query: ListLoansQuery) -> ApiResult<Vec<Loan>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * limit;

        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM loans WHERE 1=1");

        if let Some(community_id) = query.community_id {
            query_builder.push(" AND community_id = ");
            query_builder.push_bind(community_id);
        }
        if let Some(status) = query.status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status);
        }
        if let Some(borrower_user_id) = query.borrower_user_id {
            query_builder.push(" AND borrower_user_id = ");
            query_builder.push_bind(borrower_user_id);
        }
        if let Some(lender_user_id) = query.lender_user_id {
            query_builder.push(" AND lender_user_id = ");
            query_builder.push_bind(lender_user_id);
        }

        query_builder.push(" ORDER BY start_at DESC LIMIT ");
        query_builder.push_bind(limit as i64);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset as i64);

        let loans = query_builder
            .build_query_as::<Loan>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(loans)
    }

    /// Update a loan's schedule. Only Reserved loans can be updated.
    pub async fn update_loan(
        &self,
        actor: Uuid,
        id: Uuid,
        if_match: Option<&str>,
        request: UpdateLoanRequest,
    ) -> ApiResult<Loan> {
        let mut tx = self.db_pool.begin().await?;

        let loan = self.load_for_update(&mut tx, id).await?;
        self.require_participant_or_manager(&mut tx, &loan, actor, "update").await?;

        if !concurrency::is_if_match_satisfied(if_match, &loan) {
            return Err(ApiError::PreconditionFailed(
                "Entity tag does not match the current loan".to_string(),
            ));
        }
        if loan.status != LoanStatus::Reserved {
            return Err(ApiError::StateConflict(
                "Loan cannot be updated unless reserved".to_string(),
            ));
        }

        let updated = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET start_at = COALESCE($1, start_at), due_at = $2
            WHERE id = $3 AND status = 'reserved'
            RETURNING *
            "#,
        )
        .bind(request.start_at)
        .bind(request.due_at)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            ApiError::StateConflict("Loan cannot be updated unless reserved".to_string())
        })?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Delete a loan. Only Reserved loans can be deleted; the item goes back
    /// to Available in the same transaction.
    pub async fn delete_loan(&self, actor: Uuid, id: Uuid, if_match: Option<&str>) -> ApiResult<()> {
        let mut tx = self.db_pool.begin().await?;

        let loan = self.load_for_update(&mut tx, id).await?;
        self.require_participant_or_manager(&mut tx, &loan, actor, "delete").await?;

        if !concurrency::is_if_match_satisfied(if_match, &loan) {
            return Err(ApiError::PreconditionFailed(
                "Entity tag does not match the current loan".to_string(),
            ));
        }

        let deleted = sqlx::query("DELETE FROM loans WHERE id = $1 AND status = 'reserved'")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(ApiError::StateConflict(
                "Loan cannot be deleted unless reserved".to_string(),
            ));
        }

        let now = Utc::now();
        let item_updated = sqlx::query(
            "UPDATE items SET status = 'available' WHERE id = $1 AND status = 'reserved'",
        )
        .bind(loan.item_id)
        .execute(&mut *tx)
        .await?;
        if item_updated.rows_affected() > 0 {
            let event = new_event(
                loan.community_id,
                actor,
                EventEntity::Item,
                loan.item_id,
                actions::ITEM_AVAILABLE,
                now,
            );
            insert_event(&mut tx, &event).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Start a reserved loan: the item has been handed over.
    pub async fn start_loan(&self, actor: Uuid, id: Uuid) -> ApiResult<Loan> {
        let mut tx = self.db_pool.begin().await?;

        let loan = self.load_for_update(&mut tx, id).await?;
        self.require_participant_or_manager(&mut tx, &loan, actor, "start").await?;

        if loan.status != LoanStatus::Reserved {
            return Err(ApiError::StateConflict("Loan is not reserved".to_string()));
        }

        let item_updated =
            sqlx::query("UPDATE items SET status = 'inloan' WHERE id = $1 AND status = 'reserved'")
                .bind(loan.item_id)
                .execute(&mut *tx)
                .await?;
        if item_updated.rows_affected() == 0 {
            return Err(ApiError::StateConflict("Item is not reserved".to_string()));
        }

        let updated = sqlx::query_as::<_, Loan>(
            "UPDATE loans SET status = 'inloan' WHERE id = $1 AND status = 'reserved' RETURNING *",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::StateConflict("Loan is not reserved".to_string()))?;

        let now = Utc::now();
        let events = [
            new_event(
                loan.community_id,
                actor,
                EventEntity::Loan,
                loan.id,
                actions::LOAN_STARTED,
                now,
            ),
            new_event(
                loan.community_id,
                actor,
                EventEntity::Item,
                loan.item_id,
                actions::ITEM_IN_LOAN,
                now,
            ),
        ];
        for event in &events {
            insert_event(&mut tx, event).await?;
        }

        tx.commit().await?;

        Ok(updated)
    }

    /// Borrower requests the return of an in-progress loan.
    pub async fn request_return(&self, actor: Uuid, id: Uuid) -> ApiResult<Loan> {
        let mut tx = self.db_pool.begin().await?;

        let loan = self.load_for_update(&mut tx, id).await?;
        let role = membership::require_active_member(&mut *tx, loan.community_id, actor).await?;
        if !role.can_manage_community() && loan.borrower_user_id != actor {
            return Err(ApiError::Forbidden(
                "User is not allowed to request the return".to_string(),
            ));
        }
        if loan.status != LoanStatus::InLoan {
            return Err(ApiError::StateConflict("Loan is not in progress".to_string()));
        }

        let now = Utc::now();
        let updated = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'returnrequested', return_requested_at = $1, return_confirmed_at = NULL
            WHERE id = $2 AND status = 'inloan'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::StateConflict("Loan is not in progress".to_string()))?;

        let event = new_event(
            loan.community_id,
            actor,
            EventEntity::Loan,
            loan.id,
            actions::LOAN_RETURN_REQUESTED,
            now,
        );
        insert_event(&mut tx, &event).await?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Borrower cancels a pending return request; the loan goes back to
    /// InLoan.
    pub async fn cancel_return(&self, actor: Uuid, id: Uuid) -> ApiResult<Loan> {
        let mut tx = self.db_pool.begin().await?;

        let loan = self.load_for_update(&mut tx, id).await?;
        let role = membership::require_active_member(&mut *tx, loan.community_id, actor).await?;
        if !role.can_manage_community() && loan.borrower_user_id != actor {
            return Err(ApiError::Forbidden(
                "User is not allowed to cancel the return request".to_string(),
            ));
        }
        if loan.status != LoanStatus::ReturnRequested {
            return Err(ApiError::StateConflict(
                "Loan is not waiting for return confirmation".to_string(),
            ));
        }

        let now = Utc::now();
        let updated = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'inloan', return_requested_at = NULL, return_confirmed_at = NULL
            WHERE id = $1 AND status = 'returnrequested'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            ApiError::StateConflict("Loan is not waiting for return confirmation".to_string())
        })?;

        let event = new_event(
            loan.community_id,
            actor,
            EventEntity::Loan,
            loan.id,
            actions::LOAN_RETURN_CANCELED,
            now,
        );
        insert_event(&mut tx, &event).await?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Lender confirms the return: the loan completes, the item becomes
    /// available again, the linked request closes and reputation is applied.
    pub async fn confirm_return(&self, actor: Uuid, id: Uuid) -> ApiResult<Loan> {
        let mut tx = self.db_pool.begin().await?;

        let loan = self.load_for_update(&mut tx, id).await?;
        let role = membership::require_active_member(&mut *tx, loan.community_id, actor).await?;
        if !role.can_manage_community() && loan.lender_user_id != actor {
            return Err(ApiError::Forbidden(
                "User is not allowed to confirm the return".to_string(),
            ));
        }
        if loan.status != LoanStatus::ReturnRequested {
            return Err(ApiError::StateConflict(
                "Loan is not waiting for return confirmation".to_string(),
            ));
        }

        let now = Utc::now();
        let updated = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'returned', returned_at = $1, return_confirmed_at = $1
            WHERE id = $2 AND status = 'returnrequested'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            ApiError::StateConflict("Loan is not waiting for return confirmation".to_string())
        })?;

        let item_updated =
            sqlx::query("UPDATE items SET status = 'available' WHERE id = $1 AND status = 'inloan'")
                .bind(loan.item_id)
                .execute(&mut *tx)
                .await?;
        if item_updated.rows_affected() == 0 {
            return Err(ApiError::StateConflict("Item is not in loan".to_string()));
        }

        let on_time = Loan::is_on_time_return(updated.due_at, updated.returned_at);
        reputation::apply_return(
            &mut tx,
            loan.community_id,
            loan.lender_user_id,
            loan.borrower_user_id,
            on_time,
        )
        .await?;

        let mut events = vec![
            new_event(
                loan.community_id,
                actor,
                EventEntity::Loan,
                loan.id,
                actions::LOAN_RETURNED,
                now,
            ),
            new_event(
                loan.community_id,
                actor,
                EventEntity::Item,
                loan.item_id,
                actions::ITEM_AVAILABLE,
                now,
            ),
        ];

        if let Some(request_id) = loan.request_id {
            let request_updated = sqlx::query(
                "UPDATE requests SET status = 'closed' WHERE id = $1 AND status = $2",
            )
            .bind(request_id)
            .bind(RequestStatus::Accepted)
            .execute(&mut *tx)
            .await?;
            if request_updated.rows_affected() > 0 {
                events.push(new_event(
                    loan.community_id,
                    actor,
                    EventEntity::Request,
                    request_id,
                    actions::REQUEST_CLOSED,
                    now,
                ));
            }
        }

        for event in &events {
            insert_event(&mut tx, event).await?;
        }

        tx.commit().await?;

        Ok(updated)
    }

    async fn load_for_update(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
    ) -> ApiResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| ApiError::NotFound("Loan".to_string()))
    }

    async fn require_participant_or_manager(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        loan: &Loan,
        actor: Uuid,
        verb: &str,
    ) -> ApiResult<MembershipRole> {
        let role = membership::require_active_member(&mut **tx, loan.community_id, actor).await?;
        if !role.can_manage_community()
            && loan.lender_user_id != actor
            && loan.borrower_user_id != actor
        {
            return Err(ApiError::Forbidden(format!(
                "User is not allowed to {} the loan",
                verb
            )));
        }
        Ok(role)
    }
}
