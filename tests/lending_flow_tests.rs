//! End-to-end tests for the lending state machine
//!
//! These tests run against a real PostgreSQL database; set
//! TEST_DATABASE_URL and drop the #[ignore] markers to run them.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use lendcircle_server::error::ApiError;
use lendcircle_server::item::{CreateItemRequest, ItemService, ItemStatus};
use lendcircle_server::loan::{LoanService, LoanStatus};
use lendcircle_server::offer::{AcceptOfferRequest, CreateOfferRequest, OfferService};
use lendcircle_server::reputation::ReputationService;
use lendcircle_server::request::{CreateRequestRequest, RequestService, RequestStatus};

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

/// Seed a community with three active members: lender, borrower, bystander
async fn seed_community(pool: &PgPool) -> (Uuid, Uuid, Uuid, Uuid) {
    let community_id = Uuid::new_v4();
    let lender = Uuid::new_v4();
    let borrower = Uuid::new_v4();
    let bystander = Uuid::new_v4();

    sqlx::query("INSERT INTO communities (id, name) VALUES ($1, $2)")
        .bind(community_id)
        .bind("test community")
        .execute(pool)
        .await
        .expect("insert community");

    for user_id in [lender, borrower, bystander] {
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

    (community_id, lender, borrower, bystander)
}

fn item_request(community_id: Uuid) -> CreateItemRequest {
    CreateItemRequest {
        community_id,
        name: "cordless drill".to_string(),
        description: "18V with two batteries".to_string(),
        category: Some("tools".to_string()),
    }
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_accept_start_return_flow() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower, _) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let requests = RequestService::new(pool.clone());
    let offers = OfferService::new(pool.clone());
    let loans = LoanService::new(pool.clone());

    let item = items
        .create_item(lender, item_request(community_id))
        .await
        .expect("create item");
    assert_eq!(item.status, ItemStatus::Available);

    let request = requests
        .create_request(
            borrower,
            CreateRequestRequest {
                community_id,
                title: "need a drill".to_string(),
                description: String::new(),
                needed_from: None,
                needed_to: None,
            },
        )
        .await
        .expect("create request");
    assert_eq!(request.status, RequestStatus::Open);

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

    // Accepting the offer reserves the item, creates the loan and accepts
    // the request, atomically.
    let loan = offers
        .accept_offer(borrower, offer.id, AcceptOfferRequest::default())
        .await
        .expect("accept offer");
    assert_eq!(loan.status, LoanStatus::Reserved);
    assert_eq!(loan.lender_user_id, lender);
    assert_eq!(loan.borrower_user_id, borrower);

    let item = items.get_item(item.id).await.expect("get").expect("item");
    assert_eq!(item.status, ItemStatus::Reserved);
    let request = requests
        .get_request(request.id)
        .await
        .expect("get")
        .expect("request");
    assert_eq!(request.status, RequestStatus::Accepted);

    let loan = loans.start_loan(lender, loan.id).await.expect("start loan");
    assert_eq!(loan.status, LoanStatus::InLoan);
    let item = items.get_item(item.id).await.expect("get").expect("item");
    assert_eq!(item.status, ItemStatus::InLoan);

    let loan = loans
        .request_return(borrower, loan.id)
        .await
        .expect("request return");
    assert_eq!(loan.status, LoanStatus::ReturnRequested);
    assert!(loan.return_requested_at.is_some());

    let loan = loans
        .confirm_return(lender, loan.id)
        .await
        .expect("confirm return");
    assert_eq!(loan.status, LoanStatus::Returned);
    assert!(loan.returned_at.is_some());

    let item = items.get_item(item.id).await.expect("get").expect("item");
    assert_eq!(item.status, ItemStatus::Available);
    let request = requests
        .get_request(request.id)
        .await
        .expect("get")
        .expect("request");
    assert_eq!(request.status, RequestStatus::Closed);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_return_cancel_restores_in_loan() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower, _) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let offers = OfferService::new(pool.clone());
    let loans = LoanService::new(pool.clone());

    let item = items
        .create_item(lender, item_request(community_id))
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

    loans.start_loan(lender, loan.id).await.expect("start loan");
    loans
        .request_return(borrower, loan.id)
        .await
        .expect("request return");

    let loan = loans
        .cancel_return(borrower, loan.id)
        .await
        .expect("cancel return");
    assert_eq!(loan.status, LoanStatus::InLoan);
    assert!(loan.return_requested_at.is_none());

    // Confirming now must fail; the negotiation was cancelled.
    let result = loans.confirm_return(lender, loan.id).await;
    assert!(matches!(result, Err(ApiError::StateConflict(_))));
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_second_accept_on_same_item_conflicts() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower, bystander) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let offers = OfferService::new(pool.clone());

    let item = items
        .create_item(lender, item_request(community_id))
        .await
        .expect("create item");

    let first = offers
        .create_offer(
            lender,
            CreateOfferRequest {
                item_id: item.id,
                request_id: None,
                message: None,
            },
        )
        .await
        .expect("create first offer");
    let second = offers
        .create_offer(
            lender,
            CreateOfferRequest {
                item_id: item.id,
                request_id: None,
                message: None,
            },
        )
        .await
        .expect("create second offer");

    offers
        .accept_offer(
            borrower,
            first.id,
            AcceptOfferRequest {
                borrower_user_id: Some(borrower),
            },
        )
        .await
        .expect("first accept succeeds");

    // The item is no longer available; the second accept must lose.
    let result = offers
        .accept_offer(
            bystander,
            second.id,
            AcceptOfferRequest {
                borrower_user_id: Some(bystander),
            },
        )
        .await;
    assert!(matches!(result, Err(ApiError::StateConflict(_))));

    // Exactly one active loan exists for the item.
    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM loans WHERE item_id = $1 AND status IN ('reserved', 'inloan')",
    )
    .bind(item.id)
    .fetch_one(&pool)
    .await
    .expect("count loans");
    assert_eq!(active, 1);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_concurrent_accepts_exactly_one_wins() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower, bystander) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let offers = OfferService::new(pool.clone());

    let item = items
        .create_item(lender, item_request(community_id))
        .await
        .expect("create item");

    let first = offers
        .create_offer(
            lender,
            CreateOfferRequest {
                item_id: item.id,
                request_id: None,
                message: None,
            },
        )
        .await
        .expect("create first offer");
    let second = offers
        .create_offer(
            lender,
            CreateOfferRequest {
                item_id: item.id,
                request_id: None,
                message: None,
            },
        )
        .await
        .expect("create second offer");

    let offers_a = offers.clone();
    let offers_b = offers.clone();
    let (result_a, result_b) = tokio::join!(
        offers_a.accept_offer(
            borrower,
            first.id,
            AcceptOfferRequest {
                borrower_user_id: Some(borrower),
            },
        ),
        offers_b.accept_offer(
            bystander,
            second.id,
            AcceptOfferRequest {
                borrower_user_id: Some(bystander),
            },
        ),
    );

    let successes = [&result_a, &result_b]
        .iter()
        .filter(|result| result.is_ok())
        .count();
    assert_eq!(successes, 1, "exactly one concurrent accept may win");

    let loser = if result_a.is_ok() { result_b } else { result_a };
    assert!(matches!(loser, Err(ApiError::StateConflict(_))));

    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM loans WHERE item_id = $1 AND status IN ('reserved', 'inloan')",
    )
    .bind(item.id)
    .fetch_one(&pool)
    .await
    .expect("count loans");
    assert_eq!(active, 1);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_on_time_return_reputation() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower, _) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let offers = OfferService::new(pool.clone());
    let loans = LoanService::new(pool.clone());
    let reputations = ReputationService::new(pool.clone());

    let item = items
        .create_item(lender, item_request(community_id))
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

    // Due tomorrow, so confirming now is on time.
    sqlx::query("UPDATE loans SET due_at = $1 WHERE id = $2")
        .bind(Utc::now() + Duration::hours(24))
        .bind(loan.id)
        .execute(&pool)
        .await
        .expect("set due date");

    loans.start_loan(lender, loan.id).await.expect("start");
    loans
        .request_return(borrower, loan.id)
        .await
        .expect("request return");
    loans
        .confirm_return(lender, loan.id)
        .await
        .expect("confirm return");

    let lender_profile = reputations
        .get_profile(community_id, lender)
        .await
        .expect("lender profile");
    assert_eq!(lender_profile.lend_count, 1);
    assert_eq!(lender_profile.score, 5);

    let borrower_profile = reputations
        .get_profile(community_id, borrower)
        .await
        .expect("borrower profile");
    assert_eq!(borrower_profile.return_count, 1);
    assert_eq!(borrower_profile.on_time_return_count, 1);
    assert_eq!(borrower_profile.score, 3);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_late_return_skips_on_time_bonus() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower, _) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let offers = OfferService::new(pool.clone());
    let loans = LoanService::new(pool.clone());
    let reputations = ReputationService::new(pool.clone());

    let item = items
        .create_item(lender, item_request(community_id))
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

    // Was due an hour ago: the return still counts, the bonus does not.
    sqlx::query("UPDATE loans SET due_at = $1 WHERE id = $2")
        .bind(Utc::now() - Duration::hours(1))
        .bind(loan.id)
        .execute(&pool)
        .await
        .expect("set due date");

    loans.start_loan(lender, loan.id).await.expect("start");
    loans
        .request_return(borrower, loan.id)
        .await
        .expect("request return");
    loans
        .confirm_return(lender, loan.id)
        .await
        .expect("confirm return");

    let borrower_profile = reputations
        .get_profile(community_id, borrower)
        .await
        .expect("borrower profile");
    assert_eq!(borrower_profile.return_count, 1);
    assert_eq!(borrower_profile.on_time_return_count, 0);
    assert_eq!(borrower_profile.score, 2);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_double_confirm_return_is_rejected() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower, _) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let offers = OfferService::new(pool.clone());
    let loans = LoanService::new(pool.clone());
    let reputations = ReputationService::new(pool.clone());

    let item = items
        .create_item(lender, item_request(community_id))
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
    loans
        .request_return(borrower, loan.id)
        .await
        .expect("request return");
    loans
        .confirm_return(lender, loan.id)
        .await
        .expect("confirm return");

    // A second confirmation must not double-apply reputation.
    let result = loans.confirm_return(lender, loan.id).await;
    assert!(matches!(result, Err(ApiError::StateConflict(_))));

    let borrower_profile = reputations
        .get_profile(community_id, borrower)
        .await
        .expect("borrower profile");
    assert_eq!(borrower_profile.return_count, 1);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_update_rejected_outside_open_state() {
    let pool = setup_test_db().await;
    let (community_id, lender, borrower, _) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());
    let offers = OfferService::new(pool.clone());

    let item = items
        .create_item(lender, item_request(community_id))
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
    offers
        .accept_offer(
            borrower,
            offer.id,
            AcceptOfferRequest {
                borrower_user_id: Some(borrower),
            },
        )
        .await
        .expect("accept offer");

    // The item is Reserved now; editing it must be a state conflict.
    let result = items
        .update_item(
            lender,
            item.id,
            None,
            lendcircle_server::item::UpdateItemRequest {
                name: "renamed".to_string(),
                description: String::new(),
                category: None,
            },
        )
        .await;
    assert!(matches!(result, Err(ApiError::StateConflict(_))));

    // Accepted offers are terminal; withdrawing must be a state conflict.
    let result = offers.withdraw_offer(lender, offer.id).await;
    assert!(matches!(result, Err(ApiError::StateConflict(_))));
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_stale_entity_tag_blocks_update() {
    let pool = setup_test_db().await;
    let (community_id, lender, _, _) = seed_community(&pool).await;

    let items = ItemService::new(pool.clone());

    let item = items
        .create_item(lender, item_request(community_id))
        .await
        .expect("create item");
    let original_tag = lendcircle_server::concurrency::compute(&item);

    // First writer succeeds with the fresh tag.
    items
        .update_item(
            lender,
            item.id,
            Some(&original_tag),
            lendcircle_server::item::UpdateItemRequest {
                name: "first edit".to_string(),
                description: String::new(),
                category: None,
            },
        )
        .await
        .expect("first update");

    // Second writer still holds the original tag and must be rejected.
    let result = items
        .update_item(
            lender,
            item.id,
            Some(&original_tag),
            lendcircle_server::item::UpdateItemRequest {
                name: "second edit".to_string(),
                description: String::new(),
                category: None,
            },
        )
        .await;
    assert!(matches!(result, Err(ApiError::PreconditionFailed(_))));

    // No mutation happened on the losing write.
    let current = items.get_item(item.id).await.expect("get").expect("item");
    assert_eq!(current.name, "first edit");

    // If-Match: * always passes.
    items
        .update_item(
            lender,
            item.id,
            Some("*"),
            lendcircle_server::item::UpdateItemRequest {
                name: "wildcard edit".to_string(),
                description: String::new(),
                category: None,
            },
        )
        .await
        .expect("wildcard update");
}
