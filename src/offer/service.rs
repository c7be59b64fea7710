//! Offer service layer - offer lifecycle and the accept transition
//!
//! Accepting an offer is the busiest transition in the state machine: it
//! moves the offer, the item, the new loan and (when present) the linked
//! request in a single transaction, with conditional updates arbitrating
//! concurrent accepts on the same item.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::concurrency;
use crate::error::{ApiError, ApiResult};
use crate::event::{actions, insert_event, new_event, EventEntity};
use crate::item::{Item, ItemStatus};
use crate::loan::{Loan, LoanStatus};
use crate::membership;
use crate::offer::{
    AcceptOfferRequest, CreateOfferRequest, ListOffersQuery, Offer, OfferStatus,
    UpdateOfferRequest,
};
use crate::request::{Request, RequestStatus};

/// Offer service for managing offer lifecycle
#[derive(Clone)]
pub struct OfferService {
    db_pool: PgPool,
}

impl OfferService {
    /// Create a new offer service instance
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Create an offer in the Open state.
    ///
    /// The offerer must own the item and the item must be Available. An
    /// offer answering a request emits OfferCreated so the requester can be
    /// notified; a free-standing offer emits nothing.
    pub async fn create_offer(&self, actor: Uuid, request: CreateOfferRequest) -> ApiResult<Offer> {
        let mut tx = self.db_pool.begin().await?;

        let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = $1")
            .bind(request.item_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::Validation("ItemId does not exist".to_string()))?;

        if item.owner_user_id != actor {
            return Err(ApiError::Forbidden(
                "Offerer must own the offered item".to_string(),
            ));
        }
        if item.status != ItemStatus::Available {
            return Err(ApiError::StateConflict("Item is not available".to_string()));
        }

        membership::require_active_member(&mut *tx, item.community_id, actor).await?;

        let linked_request = match request.request_id {
            Some(request_id) => {
                let linked =
                    sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = $1")
                        .bind(request_id)
                        .fetch_optional(&mut *tx)
                        .await?
                        .ok_or_else(|| {
                            ApiError::Validation("RequestId does not exist".to_string())
                        })?;
                if linked.community_id != item.community_id {
                    return Err(ApiError::Validation(
                        "RequestId does not belong to the community".to_string(),
                    ));
                }
                if linked.status != RequestStatus::Open {
                    return Err(ApiError::StateConflict("Request is not open".to_string()));
                }
                Some(linked)
            }
            None => None,
        };

        let now = Utc::now();
        let offer = sqlx::query_as::<_, Offer>(
            r#"
            INSERT INTO offers (
                id, community_id, offerer_user_id, request_id, item_id,
                message, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(item.community_id)
        .bind(actor)
        .bind(request.request_id)
        .bind(request.item_id)
        .bind(&request.message)
        .bind(OfferStatus::Open)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if linked_request.is_some() {
            let event = new_event(
                offer.community_id,
                actor,
                EventEntity::Offer,
                offer.id,
                actions::OFFER_CREATED,
                now,
            );
            insert_event(&mut tx, &event).await?;
        }

        tx.commit().await?;

        Ok(offer)
    }

    /// Get a single offer by ID
    pub async fn get_offer(&self, id: Uuid) -> ApiResult<Option<Offer>> {
        let offer = sqlx::query_as::<_, Offer>("SELECT * FROM offers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(offer)
    }

    /// List offers with filtering and pagination
    pub async fn list_offers(&self, query: ListOffersQuery) -> ApiResult<Vec<Offer>> {
        self.list_filtered(None, query).await
    }

    /// List the actor's own offers with filtering and pagination
    pub async fn list_my_offers(&self, actor: Uuid, query: ListOffersQuery) -> ApiResult<Vec<Offer>> {
        self.list_filtered(Some(actor), query).await
    }

    async fn list_filtered(
        &self,
        offerer: Option<Uuid>,
        query: ListOffersQuery,
    ) -> ApiResult<Vec<Offer>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * limit;

        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM offers WHERE 1=1");

        if let Some(offerer_user_id) = offerer {
            query_builder.push(" AND offerer_user_id = ");
            query_builder.push_bind(offerer_user_id);
        }
        if let Some(community_id) = query.community_id {
            query_builder.push(" AND community_id = ");
            query_builder.push_bind(community_id);
        }
        if let Some(status) = query.status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status);
        }
        if let Some(request_id) = query.request_id {
            query_builder.push(" AND request_id = ");
            query_builder.push_bind(request_id);
        }

        query_builder.push(" ORDER BY created_at DESC LIMIT ");
        query_builder.push_bind(limit as i64);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset as i64);

        let offers = query_builder
            .build_query_as::<Offer>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(offers)
    }

    /// Update an offer's message. Only Open offers, by the offerer or a
    /// community manager.
    pub async fn update_offer(
        &self,
        actor: Uuid,
        id: Uuid,
        if_match: Option<&str>,
        request: UpdateOfferRequest,
    ) -> ApiResult<Offer> {
        let mut tx = self.db_pool.begin().await?;

        let offer = sqlx::query_as::<_, Offer>("SELECT * FROM offers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound("Offer".to_string()))?;

        let role = membership::require_active_member(&mut *tx, offer.community_id, actor).await?;
        if !role.can_manage_community() && offer.offerer_user_id != actor {
            return Err(ApiError::Forbidden(
                "User is not allowed to update the offer".to_string(),
            ));
        }
        if !concurrency::is_if_match_satisfied(if_match, &offer) {
            return Err(ApiError::PreconditionFailed(
                "Entity tag does not match the current offer".to_string(),
            ));
        }
        if offer.status != OfferStatus::Open {
            return Err(ApiError::StateConflict(
                "Offer cannot be updated unless open".to_string(),
            ));
        }

        let updated = sqlx::query_as::<_, Offer>(
            "UPDATE offers SET message = $1 WHERE id = $2 AND status = 'open' RETURNING *",
        )
        .bind(&request.message)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            ApiError::StateConflict("Offer cannot be updated unless open".to_string())
        })?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Delete an offer. Only Open offers can be deleted.
    pub async fn delete_offer(&self, actor: Uuid, id: Uuid, if_match: Option<&str>) -> ApiResult<()> {
        let mut tx = self.db_pool.begin().await?;

        let offer = sqlx::query_as::<_, Offer>("SELECT * FROM offers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound("Offer".to_string()))?;

        let role = membership::require_active_member(&mut *tx, offer.community_id, actor).await?;
        if !role.can_manage_community() && offer.offerer_user_id != actor {
            return Err(ApiError::Forbidden(
                "User is not allowed to delete the offer".to_string(),
            ));
        }
        if !concurrency::is_if_match_satisfied(if_match, &offer) {
            return Err(ApiError::PreconditionFailed(
                "Entity tag does not match the current offer".to_string(),
            ));
        }

        let deleted = sqlx::query("DELETE FROM offers WHERE id = $1 AND status = 'open'")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(ApiError::StateConflict(
                "Offer cannot be deleted unless open".to_string(),
            ));
        }

        tx.commit().await?;

        Ok(())
    }

    /// Accept an open offer.
    ///
    /// Atomically: Offer -> Accepted, Item -> Reserved, a new Loan in
    /// Reserved, and the linked Request (if any) -> Accepted, plus one event
    /// per transition. Concurrent accepts race on the item's conditional
    /// update; the loser gets a state conflict and nothing is written.
    pub async fn accept_offer(
        &self,
        actor: Uuid,
        id: Uuid,
        request: AcceptOfferRequest,
    ) -> ApiResult<Loan> {
        let mut tx = self.db_pool.begin().await?;

        let offer = sqlx::query_as::<_, Offer>("SELECT * FROM offers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound("Offer".to_string()))?;

        if offer.status != OfferStatus::Open {
            return Err(ApiError::StateConflict("Offer is not open".to_string()));
        }

        let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = $1")
            .bind(offer.item_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::Validation("Offer item does not exist".to_string()))?;

        if item.status != ItemStatus::Available {
            return Err(ApiError::StateConflict("Item is not available".to_string()));
        }

        // The borrower is the requester when the offer answers a request;
        // otherwise the caller accepts the direct offer for themselves.
        let (borrower_user_id, linked_request) = match offer.request_id {
            Some(request_id) => {
                let linked = sqlx::query_as::<_, Request>(
                    "SELECT * FROM requests WHERE id = $1 FOR UPDATE",
                )
                .bind(request_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ApiError::Validation("Request does not exist".to_string()))?;

                if linked.status != RequestStatus::Open {
                    return Err(ApiError::StateConflict("Request is not open".to_string()));
                }
                if linked.requester_user_id != actor {
                    return Err(ApiError::Forbidden(
                        "Only the requester can accept this offer".to_string(),
                    ));
                }
                (linked.requester_user_id, Some(linked))
            }
            None => {
                let borrower = request.borrower_user_id.ok_or_else(|| {
                    ApiError::Validation("borrower_user_id is required".to_string())
                })?;
                if borrower != actor {
                    return Err(ApiError::Forbidden(
                        "Actor must match the borrower".to_string(),
                    ));
                }
                (borrower, None)
            }
        };

        if !membership::is_active_member(&mut *tx, offer.community_id, offer.offerer_user_id)
            .await?
        {
            return Err(ApiError::Validation(
                "Offerer is not a member of the community".to_string(),
            ));
        }
        membership::require_active_member(&mut *tx, offer.community_id, borrower_user_id).await?;

        let now = Utc::now();

        let offer_updated =
            sqlx::query("UPDATE offers SET status = 'accepted' WHERE id = $1 AND status = 'open'")
                .bind(offer.id)
                .execute(&mut *tx)
                .await?;
        if offer_updated.rows_affected() == 0 {
            return Err(ApiError::StateConflict("Offer is not open".to_string()));
        }

        // Serialization point: of two concurrent accepts on the same item,
        // exactly one sees rows_affected == 1 here.
        let item_updated = sqlx::query(
            "UPDATE items SET status = 'reserved' WHERE id = $1 AND status = 'available'",
        )
        .bind(item.id)
        .execute(&mut *tx)
        .await?;
        if item_updated.rows_affected() == 0 {
            return Err(ApiError::StateConflict("Item is not available".to_string()));
        }

        let loan = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (
                id, community_id, item_id, lender_user_id, borrower_user_id,
                request_id, offer_id, status, start_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(offer.community_id)
        .bind(offer.item_id)
        .bind(offer.offerer_user_id)
        .bind(borrower_user_id)
        .bind(offer.request_id)
        .bind(offer.id)
        .bind(LoanStatus::Reserved)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(linked) = &linked_request {
            let request_updated = sqlx::query(
                "UPDATE requests SET status = 'accepted' WHERE id = $1 AND status = 'open'",
            )
            .bind(linked.id)
            .execute(&mut *tx)
            .await?;
            if request_updated.rows_affected() == 0 {
                return Err(ApiError::StateConflict("Request is not open".to_string()));
            }
        }

        let mut events = vec![
            new_event(
                offer.community_id,
                actor,
                EventEntity::Offer,
                offer.id,
                actions::OFFER_ACCEPTED,
                now,
            ),
            new_event(
                offer.community_id,
                actor,
                EventEntity::Item,
                item.id,
                actions::ITEM_RESERVED,
                now,
            ),
            new_event(
                offer.community_id,
                actor,
                EventEntity::Loan,
                loan.id,
                actions::LOAN_RESERVED,
                now,
            ),
        ];
        if let Some(linked) = &linked_request {
            events.push(new_event(
                offer.community_id,
                actor,
                EventEntity::Request,
                linked.id,
                actions::REQUEST_ACCEPTED,
                now,
            ));
        }
        for event in &events {
            insert_event(&mut tx, event).await?;
        }

        tx.commit().await?;

        Ok(loan)
    }

    /// Reject an open offer. The requester (for request-linked offers), the
    /// offerer (for direct ones) or a community manager may reject.
    pub async fn reject_offer(&self, actor: Uuid, id: Uuid) -> ApiResult<Offer> {
        self.close_offer(actor, id, OfferStatus::Rejected, actions::OFFER_REJECTED)
            .await
    }

    /// Withdraw an open offer. The offerer or a community manager may
    /// withdraw.
    pub async fn withdraw_offer(&self, actor: Uuid, id: Uuid) -> ApiResult<Offer> {
        self.close_offer(actor, id, OfferStatus::Withdrawn, actions::OFFER_WITHDRAWN)
            .await
    }

    async fn close_offer(
        &self,
        actor: Uuid,
        id: Uuid,
        target: OfferStatus,
        action: &str,
    ) -> ApiResult<Offer> {
        let mut tx = self.db_pool.begin().await?;

        let offer = sqlx::query_as::<_, Offer>("SELECT * FROM offers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound("Offer".to_string()))?;

        let role = membership::require_active_member(&mut *tx, offer.community_id, actor).await?;
        if offer.status != OfferStatus::Open {
            return Err(ApiError::StateConflict("Offer is not open".to_string()));
        }

        let allowed = match (target, offer.request_id) {
            (OfferStatus::Rejected, Some(request_id)) => {
                let requester = sqlx::query_scalar::<_, Uuid>(
                    "SELECT requester_user_id FROM requests WHERE id = $1",
                )
                .bind(request_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ApiError::Validation("Request does not exist".to_string()))?;
                role.can_manage_community() || requester == actor
            }
            _ => role.can_manage_community() || offer.offerer_user_id == actor,
        };
        if !allowed {
            return Err(ApiError::Forbidden(
                "User is not allowed to close the offer".to_string(),
            ));
        }

        let now = Utc::now();
        let updated = sqlx::query_as::<_, Offer>(
            "UPDATE offers SET status = $1 WHERE id = $2 AND status = 'open' RETURNING *",
        )
        .bind(target)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::StateConflict("Offer is not open".to_string()))?;

        let event = new_event(
            offer.community_id,
            actor,
            EventEntity::Offer,
            offer.id,
            action,
            now,
        );
        insert_event(&mut tx, &event).await?;

        tx.commit().await?;

        Ok(updated)
    }
}
