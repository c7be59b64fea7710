//! LendCircle Backend Server
//!
//! Community lending API: members list items or post borrow requests,
//! offers become loans, and a background dispatcher fans the domain event
//! log out into per-user notifications.

use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use lendcircle_server::config::Config;
use lendcircle_server::item::ItemService;
use lendcircle_server::loan::LoanService;
use lendcircle_server::middleware::{self, AuthVerifier, IdempotencyGuard};
use lendcircle_server::notification::{
    NotificationDispatcher, NotificationRuleTable, NotificationService,
};
use lendcircle_server::offer::OfferService;
use lendcircle_server::reputation::ReputationService;
use lendcircle_server::request::RequestService;
use lendcircle_server::routes;
use lendcircle_server::state::AppState;
use lendcircle_server::db;

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    // Initialize database connection pool and schema
    let db_pool = match db::create_pool(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = db::run_migrations(&db_pool).await {
        tracing::error!("Failed to run migrations: {}", e);
        std::process::exit(1);
    }

    // Initialize services
    let auth_verifier = Arc::new(AuthVerifier::new(&config.jwt_secret));
    let item_service = Arc::new(ItemService::new(db_pool.clone()));
    let request_service = Arc::new(RequestService::new(db_pool.clone()));
    let offer_service = Arc::new(OfferService::new(db_pool.clone()));
    let loan_service = Arc::new(LoanService::new(db_pool.clone()));
    let notification_service = Arc::new(NotificationService::new(db_pool.clone()));
    let reputation_service = Arc::new(ReputationService::new(db_pool.clone()));

    let app_state = AppState::new(
        item_service,
        request_service,
        offer_service,
        loan_service,
        notification_service,
        reputation_service,
        auth_verifier.clone(),
    );

    // Start the notification dispatcher in the background. A single active
    // instance owns the watermark.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut dispatcher_handle = None;
    if config.notification_dispatch_enabled {
        let dispatcher = NotificationDispatcher::new(
            db_pool.clone(),
            NotificationRuleTable::standard(),
            config.notification_batch_size,
        );
        let poll_interval = Duration::from_secs(config.notification_poll_interval_seconds);
        dispatcher_handle = Some(tokio::spawn(
            dispatcher.run(poll_interval, shutdown_rx),
        ));
    }

    // Idempotency guard over the mutating endpoints
    let idempotency_guard = IdempotencyGuard::new(
        db_pool.clone(),
        auth_verifier.clone(),
        config.idempotency_replay_ttl_hours,
    );

    // Clone db_pool for health check
    let health_db_pool = db_pool.clone();

    // Create the app router
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(move || health_check(health_db_pool.clone())))
        .merge(routes::item_routes())
        .merge(routes::request_routes())
        .merge(routes::offer_routes())
        .merge(routes::loan_routes())
        .merge(routes::notification_routes())
        .merge(routes::reputation_routes())
        .with_state(app_state)
        .layer(axum::middleware::from_fn_with_state(
            idempotency_guard,
            middleware::idempotency_guard,
        ))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(configure_cors(&config.cors_allowed_origins));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    // Serve with graceful shutdown
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    // Stop the dispatcher and wait for its current tick to finish
    shutdown_tx.send(true).ok();
    if let Some(handle) = dispatcher_handle {
        handle.await.ok();
    }

    tracing::info!("Server shutdown complete");
}

async fn root() -> &'static str {
    "LendCircle API Server"
}

/// Health check response
#[derive(serde::Serialize)]
struct HealthResponse {
    status: String,
    database: String,
    version: String,
}

/// Health check endpoint
async fn health_check(pool: sqlx::PgPool) -> axum::Json<HealthResponse> {
    let db_status = match db::check_health(&pool).await {
        Ok(_) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if db_status == "connected" {
        "healthy"
    } else {
        "unhealthy"
    };

    axum::Json(HealthResponse {
        status: status.to_string(),
        database: db_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn configure_cors(allowed_origins: &Option<String>) -> CorsLayer {
    let allowed_origins_str = allowed_origins.clone().unwrap_or_default();

    if allowed_origins_str.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
