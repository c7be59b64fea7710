//! Watermark-driven notification dispatcher
//!
//! A single-writer polling loop that consumes the event log exactly once
//! per (event, kind, recipient) triple. Each tick processes one batch in
//! one transaction: the dispatch-state row is locked, events past the
//! watermark are fetched in (created_at, id) order, recipients are resolved
//! with batched lookups, already-present notification keys are skipped, and
//! the watermark advances together with the inserts. A failed tick leaves
//! the watermark untouched; the next tick re-reads the same batch and the
//! dedup preload makes redelivery a no-op.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use uuid::Uuid;

use crate::event::{self, Event, EventEntity};
use crate::loan::Loan;
use crate::notification::{DispatchState, NotificationKind, NotificationRuleTable};
use crate::offer::Offer;

const DISPATCH_STATE_ID: &str = "default";

/// Background dispatcher fanning events out into notifications
pub struct NotificationDispatcher {
    db_pool: PgPool,
    rules: NotificationRuleTable,
    batch_size: i64,
}

impl NotificationDispatcher {
    /// Create a new dispatcher instance
    pub fn new(db_pool: PgPool, rules: NotificationRuleTable, batch_size: i64) -> Self {
        Self {
            db_pool,
            rules,
            batch_size,
        }
    }

    /// Run the polling loop until the shutdown signal flips to true.
    ///
    /// Exactly one instance per deployment should run this loop; the
    /// dispatch-state row lock makes an accidental second instance
    /// serialize instead of double-reading a batch.
    pub async fn run(self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_seconds = poll_interval.as_secs(),
            batch_size = self.batch_size,
            "Notification dispatcher started"
        );

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.process_batch().await {
                        Ok(0) => {}
                        Ok(count) => {
                            tracing::debug!(events = count, "Processed notification batch");
                        }
                        Err(e) => {
                            tracing::error!("Notification dispatch tick failed: {:#}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Notification dispatcher stopped");
    }

    /// Process one batch of events. Returns the number of events consumed
    /// (zero when the log is fully caught up).
    pub async fn process_batch(&self) -> Result<usize> {
        let mut tx = self
            .db_pool
            .begin()
            .await
            .context("Failed to begin dispatch transaction")?;

        let state = sqlx::query_as::<_, DispatchState>(
            "SELECT * FROM notification_dispatch_state WHERE id = $1 FOR UPDATE",
        )
        .bind(DISPATCH_STATE_ID)
        .fetch_optional(&mut *tx)
        .await?;

        let state = match state {
            Some(state) => state,
            None => {
                // First run: seed the cursor before the beginning of time.
                let seeded = DispatchState {
                    id: DISPATCH_STATE_ID.to_string(),
                    last_processed_at: DateTime::<Utc>::UNIX_EPOCH,
                    last_processed_event_id: Uuid::nil(),
                };
                sqlx::query(
                    r#"
                    INSERT INTO notification_dispatch_state (id, last_processed_at, last_processed_event_id)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(&seeded.id)
                .bind(seeded.last_processed_at)
                .bind(seeded.last_processed_event_id)
                .execute(&mut *tx)
                .await?;
                seeded
            }
        };

        let events = event::fetch_after(
            &mut *tx,
            state.last_processed_at,
            state.last_processed_event_id,
            self.batch_size,
        )
        .await
        .context("Failed to fetch events past the watermark")?;

        if events.is_empty() {
            // Nothing to do; the watermark must not move.
            return Ok(0);
        }

        let recipients = self.resolve_recipients(&mut tx, &events).await?;
        let existing = load_existing_keys(&mut tx, &events).await?;

        for event in &events {
            let Some(event_recipients) = recipients.get(&event.id) else {
                continue;
            };

            for (kind, recipient_user_id) in event_recipients {
                let key = (event.id, *kind, *recipient_user_id);
                if existing.contains(&key) {
                    continue;
                }

                // The unique index on (event_id, kind, recipient_user_id) is
                // the backstop for anything the preload missed.
                sqlx::query(
                    r#"
                    INSERT INTO notifications (
                        id, recipient_user_id, community_id, kind, event_id,
                        entity_type, entity_id, payload, status, created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
                    ON CONFLICT (event_id, kind, recipient_user_id) DO NOTHING
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(recipient_user_id)
                .bind(event.community_id)
                .bind(kind)
                .bind(event.id)
                .bind(event.entity_type)
                .bind(event.entity_id)
                .bind(&event.payload)
                .bind(event.created_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        // Watermark and notifications commit together; a crash mid-batch
        // rolls both back.
        let last = &events[events.len() - 1];
        sqlx::query(
            r#"
            UPDATE notification_dispatch_state
            SET last_processed_at = $1, last_processed_event_id = $2
            WHERE id = $3
            "#,
        )
        .bind(last.created_at)
        .bind(last.id)
        .bind(DISPATCH_STATE_ID)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .context("Failed to commit dispatch transaction")?;

        Ok(events.len())
    }

    /// Resolve (kind, recipient) pairs for each event, batch-loading the
    /// referenced offers (with their requests) and loans once for the whole
    /// batch.
    async fn resolve_recipients(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        events: &[Event],
    ) -> Result<HashMap<Uuid, Vec<(NotificationKind, Uuid)>>> {
        let offer_ids: Vec<Uuid> = events
            .iter()
            .filter(|e| e.entity_type == EventEntity::Offer)
            .map(|e| e.entity_id)
            .collect();
        let loan_ids: Vec<Uuid> = events
            .iter()
            .filter(|e| e.entity_type == EventEntity::Loan)
            .map(|e| e.entity_id)
            .collect();

        let offers: Vec<Offer> =
            sqlx::query_as::<_, Offer>("SELECT * FROM offers WHERE id = ANY($1)")
                .bind(&offer_ids)
                .fetch_all(&mut **tx)
                .await?;
        let offers_by_id: HashMap<Uuid, Offer> =
            offers.into_iter().map(|o| (o.id, o)).collect();

        let request_ids: Vec<Uuid> = offers_by_id
            .values()
            .filter_map(|o| o.request_id)
            .collect();
        let requesters: Vec<(Uuid, Uuid)> = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT id, requester_user_id FROM requests WHERE id = ANY($1)",
        )
        .bind(&request_ids)
        .fetch_all(&mut **tx)
        .await?;
        let requester_by_request: HashMap<Uuid, Uuid> = requesters.into_iter().collect();

        let loans: Vec<Loan> = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = ANY($1)")
            .bind(&loan_ids)
            .fetch_all(&mut **tx)
            .await?;
        let loans_by_id: HashMap<Uuid, Loan> = loans.into_iter().map(|l| (l.id, l)).collect();

        let mut result: HashMap<Uuid, Vec<(NotificationKind, Uuid)>> = HashMap::new();

        for event in events {
            let kinds = self.rules.kinds_for(event);
            if kinds.is_empty() {
                continue;
            }

            let mut recipients: Vec<(NotificationKind, Uuid)> = Vec::new();
            for kind in kinds {
                use NotificationKind::*;
                let recipient = match kind {
                    OfferReceivedToRequester | OfferWithdrawnToRequester => offers_by_id
                        .get(&event.entity_id)
                        .and_then(|offer| offer.request_id)
                        .and_then(|request_id| requester_by_request.get(&request_id).copied()),
                    OfferAcceptedToLender | OfferRejectedToLender => offers_by_id
                        .get(&event.entity_id)
                        .map(|offer| offer.offerer_user_id),
                    LoanReservedToBorrower | LoanStartedToBorrower
                    | LoanReturnConfirmedToBorrower => loans_by_id
                        .get(&event.entity_id)
                        .map(|loan| loan.borrower_user_id),
                    LoanReservedToLender
                    | LoanReturnRequestedToLender
                    | LoanReturnConfirmedToLender
                    | LoanReturnCanceledToLender => loans_by_id
                        .get(&event.entity_id)
                        .map(|loan| loan.lender_user_id),
                };
                if let Some(recipient_user_id) = recipient {
                    recipients.push((*kind, recipient_user_id));
                }
            }

            if !recipients.is_empty() {
                result.insert(event.id, recipients);
            }
        }

        Ok(result)
    }
}

/// Load the (event_id, kind, recipient) keys already present for a batch,
/// so reprocessing after a failed tick skips them.
async fn load_existing_keys(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    events: &[Event],
) -> Result<HashSet<(Uuid, NotificationKind, Uuid)>> {
    let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();

    let keys: Vec<(Uuid, NotificationKind, Uuid)> = sqlx::query_as(
        "SELECT event_id, kind, recipient_user_id FROM notifications WHERE event_id = ANY($1)",
    )
    .bind(&event_ids)
    .fetch_all(&mut **tx)
    .await?;

    Ok(keys.into_iter().collect())
}
