//! Event log persistence
//!
//! Events are only ever inserted inside the transaction that performs the
//! entity mutation they describe, and only ever read back through the
//! watermark query used by the notification dispatcher.

use sqlx::types::chrono::{DateTime, Utc};
use sqlx::{PgExecutor, Postgres, Transaction};
use uuid::Uuid;

use super::model::{Event, EventEntity};

/// Build an event row for the current transition.
pub fn new_event(
    community_id: Uuid,
    actor_user_id: Uuid,
    entity_type: EventEntity,
    entity_id: Uuid,
    action: &str,
    created_at: DateTime<Utc>,
) -> Event {
    Event {
        id: Uuid::new_v4(),
        community_id,
        actor_user_id,
        entity_type,
        entity_id,
        action: action.to_string(),
        payload: None,
        created_at,
    }
}

/// Insert an event as part of the caller's transaction.
pub async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &Event,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO events (
            id, community_id, actor_user_id, entity_type, entity_id,
            action, payload, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(event.id)
    .bind(event.community_id)
    .bind(event.actor_user_id)
    .bind(event.entity_type)
    .bind(event.entity_id)
    .bind(&event.action)
    .bind(&event.payload)
    .bind(event.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Fetch up to `limit` events strictly after the `(created_at, id)`
/// watermark, in `(created_at, id)` order.
pub async fn fetch_after<'e, E>(
    executor: E,
    after_at: DateTime<Utc>,
    after_id: Uuid,
    limit: i64,
) -> Result<Vec<Event>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Event>(
        r#"
        SELECT * FROM events
        WHERE (created_at, id) > ($1, $2)
        ORDER BY created_at, id
        LIMIT $3
        "#,
    )
    .bind(after_at)
    .bind(after_id)
    .bind(limit)
    .fetch_all(executor)
    .await
}
