//! Tests for the watermark-driven notification dispatcher
//!
//! These tests run against a real PostgreSQL database; set
//! TEST_DATABASE_URL and drop the #[ignore] markers to run them.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use lendcircle_server::item::{CreateItemRequest, ItemService};
use lendcircle_server::loan::LoanService;
use lendcircle_server::notification::{
    NotificationDispatcher, NotificationKind, NotificationRuleTable,
};
use lendcircle_server::offer::{AcceptOfferRequest, CreateOfferRequest, OfferService};
use lendcircle_server::request::{CreateRequestRequest, RequestService};

/// Helper to create a test database pool with the schema applied
async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/lendcircle_test".to_string());

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

async fn seed_community(pool: &PgPool) -> (Uuid, Uuid, Uuid) {
    let community_id = Uuid::new_v4();
    let lender = Uuid::new_v4();
    let borrower = Uuid::new_v4();

    sqlx::query("INSERT INTO communities (id, name) VALUES ($1, $2)")
        .bind(community_id)
        .bind("test community")
        .execute(pool)
        .await
        .expect("insert community");

    for user_id in [lender, borrower] {
        sqlx::query("INSERT INTO users (id, username) VALUES ($1, $2)")
            .bind(user_id)
            .bind(format!("user-{}", user_id))
            .execute(pool)
            .await
            .expect("insert user");
        sqlx::query(
            "INSERT INTO memberships (id, community_id, user_id, role, status)
             VALUES ($1, $2, $3, 'member', 'active')",
        )
        .bind(Uuid::new_v4())
        .bind(community_id)
        .bind(user_id)
        .execute(pool)
        .await
        .expect("insert membership");
    }

    (community_id, lender, borrower)
}

fn dispatcher(pool: &PgPool) -> NotificationDispatcher {
    NotificationDispatcher::new(pool.clone(), NotificationRuleTable::standard(), 100)
}

/// Drain the event log completely so the assertions below see a settled
/// state regardless of batch boundaries.
async fn drain(dispatcher: &NotificationDispatcher) {
    loop {
        let processed = dispatcher.process_batch().await.expect("process batch");
        if processed == 0 {
            break;
        }
    }
}

async fn notification_rows(pool: &PgPool, loan_id: Uuid) -> Vec<(Uuid, NotificationKind, Uuid)> {
    sqlx::query_as(
        r#"
        SELECT n.event_id, n.kind, n.recipient_user_id
        FROM notifications n
        JOIN events e ON e.id = n.event_id
        WHERE e.entity_id = $1
        ORDER BY n.event_id, n.recipient_user_id
        "#,
    )
    .bind(loan_id)
    .fetch_all(pool)
    .await
    .expect("load notifications")
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_loan_reserved_fans_out_to_both_parties() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let offers = OfferService::new(pool.clone());

    let item = items
        .create_item(
            lender,
            CreateItemRequest {
                community_id,
                name: "ladder".to_string(),
                description: String::new(),
                category: None,
            },
        )
        .await
        .expect("create item");
    let offer = offers
        .create_offer(
            lender,
            CreateOfferRequest {
                item_id: item.id,
                request_id: None,
                message: None,
            },
        )
        .await
        .expect("create offer");
    let loan = offers
        .accept_offer(
            borrower,
            offer.id,
            AcceptOfferRequest {
                borrower_user_id: Some(borrower),
            },
        )
        .await
        .expect("accept offer");

    drain(&dispatcher(&pool)).await;

    let rows = notification_rows(&pool, loan.id).await;
    let kinds: Vec<(NotificationKind, Uuid)> =
        rows.iter().map(|(_, kind, user)| (*kind, *user)).collect();
    assert!(kinds.contains(&(NotificationKind::LoanReservedToBorrower, borrower)));
    assert!(kinds.contains(&(NotificationKind::LoanReservedToLender, lender)));
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_reprocessing_is_idempotent() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let offers = OfferService::new(pool.clone());

    let item = items
        .create_item(
            lender,
            CreateItemRequest {
                community_id,
                name: "tent".to_string(),
                description: String::new(),
                category: None,
            },
        )
        .await
        .expect("create item");
    let offer = offers
        .create_offer(
            lender,
            CreateOfferRequest {
                item_id: item.id,
                request_id: None,
                message: None,
            },
        )
        .await
        .expect("create offer");
    let loan = offers
        .accept_offer(
            borrower,
            offer.id,
            AcceptOfferRequest {
                borrower_user_id: Some(borrower),
            },
        )
        .await
        .expect("accept offer");

    let dispatcher = dispatcher(&pool);
    drain(&dispatcher).await;
    let first_pass = notification_rows(&pool, loan.id).await;

    // Force the dispatcher to re-read everything from the beginning.
    sqlx::query(
        "UPDATE notification_dispatch_state
         SET last_processed_at = 'epoch', last_processed_event_id = $1
         WHERE id = 'default'",
    )
    .bind(Uuid::nil())
    .execute(&pool)
    .await
    .expect("rewind watermark");

    drain(&dispatcher).await;
    let second_pass = notification_rows(&pool, loan.id).await;

    // Redelivery after the rewind is a no-op: same rows, no duplicates.
    assert_eq!(first_pass, second_pass);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_watermark_advances_in_event_order() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let offers = OfferService::new(pool.clone());
    let loans = LoanService::new(pool.clone());

    let item = items
        .create_item(
            lender,
            CreateItemRequest {
                community_id,
                name: "bike".to_string(),
                description: String::new(),
                category: None,
            },
        )
        .await
        .expect("create item");
    let offer = offers
        .create_offer(
            lender,
            CreateOfferRequest {
                item_id: item.id,
                request_id: None,
                message: None,
            },
        )
        .await
        .expect("create offer");
    let loan = offers
        .accept_offer(
            borrower,
            offer.id,
            AcceptOfferRequest {
                borrower_user_id: Some(borrower),
            },
        )
        .await
        .expect("accept offer");
    loans.start_loan(lender, loan.id).await.expect("start");

    let dispatcher = dispatcher(&pool);
    drain(&dispatcher).await;

    // The watermark points at (or past) this test's newest event. All of
    // the accept transaction's events share one timestamp; the id
    // tie-break still gives a stable order and a strictly advancing
    // watermark.
    let (watermark_at, watermark_id): (chrono::DateTime<Utc>, Uuid) = sqlx::query_as(
        "SELECT last_processed_at, last_processed_event_id
         FROM notification_dispatch_state WHERE id = 'default'",
    )
    .fetch_one(&pool)
    .await
    .expect("load watermark");

    let remaining: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM events WHERE (created_at, id) > ($1, $2)",
    )
    .bind(watermark_at)
    .bind(watermark_id)
    .fetch_one(&pool)
    .await
    .expect("count unprocessed");
    assert_eq!(remaining, 0, "dispatcher must drain up to its watermark");

    // An empty tick must not move the watermark.
    let processed = dispatcher.process_batch().await.expect("empty tick");
    assert_eq!(processed, 0);
    let (after_at, after_id): (chrono::DateTime<Utc>, Uuid) = sqlx::query_as(
        "SELECT last_processed_at, last_processed_event_id
         FROM notification_dispatch_state WHERE id = 'default'",
    )
    .fetch_one(&pool)
    .await
    .expect("reload watermark");
    assert_eq!((watermark_at, watermark_id), (after_at, after_id));
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_small_batches_preserve_ordering() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let requests = RequestService::new(pool.clone());
    let offers = OfferService::new(pool.clone());

    let item = items
        .create_item(
            lender,
            CreateItemRequest {
                community_id,
                name: "projector".to_string(),
                description: String::new(),
                category: None,
            },
        )
        .await
        .expect("create item");
    let request = requests
        .create_request(
            borrower,
            CreateRequestRequest {
                community_id,
                title: "movie night".to_string(),
                description: String::new(),
                needed_from: None,
                needed_to: None,
            },
        )
        .await
        .expect("create request");
    let offer = offers
        .create_offer(
            lender,
            CreateOfferRequest {
                item_id: item.id,
                request_id: Some(request.id),
                message: None,
            },
        )
        .await
        .expect("create offer");
    let loan = offers
        .accept_offer(borrower, offer.id, AcceptOfferRequest::default())
        .await
        .expect("accept offer");

    // Batch size 1 forces one event per tick; the run must still converge
    // to the same notification set as one big batch would.
    let dispatcher = NotificationDispatcher::new(pool.clone(), NotificationRuleTable::standard(), 1);
    drain(&dispatcher).await;

    let loan_rows = notification_rows(&pool, loan.id).await;
    assert_eq!(loan_rows.len(), 2);

    let offer_rows: Vec<(NotificationKind, Uuid)> = sqlx::query_as(
        r#"
        SELECT n.kind, n.recipient_user_id
        FROM notifications n
        JOIN events e ON e.id = n.event_id
        WHERE e.entity_id = $1
        "#,
    )
    .bind(offer.id)
    .fetch_all(&pool)
    .await
    .expect("load offer notifications");
    assert!(offer_rows.contains(&(NotificationKind::OfferReceivedToRequester, borrower)));
    assert!(offer_rows.contains(&(NotificationKind::OfferAcceptedToLender, lender)));
}
