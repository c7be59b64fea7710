//! Idempotency-key middleware
//!
//! Gives designated mutating endpoints at-most-one-execution semantics: a
//! retried request carrying the same `Idempotency-Key` and payload replays
//! the stored response instead of re-executing the handler, a concurrent
//! duplicate or a payload mismatch is rejected with a conflict, and any
//! failure path voids the pending record so the next attempt starts clean.
//! The unique constraint on (actor, method, path, key) is the arbiter of
//! "first writer wins"; the application-level lookup is an optimization.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::auth::AuthVerifier;

/// Request header carrying the client's idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
/// Response header telling the client whether the response was replayed
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "Idempotency-Replayed";

const MIN_KEY_LENGTH: usize = 8;
const MAX_KEY_LENGTH: usize = 128;

/// A stored first attempt, pending until its response snapshot lands
#[derive(Debug, sqlx::FromRow)]
struct IdempotencyRecord {
    request_hash: String,
    response_status: Option<i32>,
    response_body: Option<String>,
    response_content_type: Option<String>,
    response_location: Option<String>,
}

/// Shared state for the idempotency middleware
#[derive(Clone)]
pub struct IdempotencyGuard {
    db_pool: PgPool,
    verifier: Arc<AuthVerifier>,
    replay_ttl: Duration,
}

impl IdempotencyGuard {
    /// Create a new guard instance
    pub fn new(db_pool: PgPool, verifier: Arc<AuthVerifier>, replay_ttl_hours: i64) -> Self {
        Self {
            db_pool,
            verifier,
            replay_ttl: Duration::hours(replay_ttl_hours.max(1)),
        }
    }
}

/// Middleware entry point, layered with `from_fn_with_state`.
pub async fn idempotency_guard(
    State(guard): State<IdempotencyGuard>,
    request: Request,
    next: Next,
) -> Response {
    if !is_protected(request.method().as_str(), request.uri().path()) {
        return next.run(request).await;
    }

    let key = request
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);

    let key = match key {
        Some(key) => key,
        None => return next.run(request).await,
    };

    if let Err(message) = validate_key(&key) {
        return ApiError::Validation(message).into_response();
    }

    let actor_user_id = resolve_actor(&guard, &request);
    let method = request.method().as_str().to_uppercase();
    let path = normalize_path(request.uri().path());

    // Hash content type and body together so a retried key with any payload
    // difference is detectable.
    let (parts, body) = request.into_parts();
    let body_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::Validation("Failed to read request body".to_string()).into_response()
        }
    };
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let request_hash = compute_request_hash(&content_type, &body_bytes);
    let request = Request::from_parts(parts, Body::from(body_bytes));

    let now = Utc::now();
    if let Err(e) = purge_expired(&guard.db_pool, now).await {
        tracing::warn!("Failed to purge expired idempotency records: {}", e);
    }

    match find_record(&guard.db_pool, &actor_user_id, &method, &path, &key).await {
        Ok(Some(existing)) => {
            return handle_existing(existing, &request_hash);
        }
        Ok(None) => {}
        Err(e) => return ApiError::from(e).into_response(),
    }

    let record_id = Uuid::new_v4();
    let inserted = insert_pending(
        &guard.db_pool,
        record_id,
        &actor_user_id,
        &method,
        &path,
        &key,
        &request_hash,
        now,
        now + guard.replay_ttl,
    )
    .await;

    match inserted {
        Ok(()) => {}
        Err(e) if is_unique_violation(&e) => {
            // Lost the race against a concurrent first attempt with the
            // same key; re-read and treat it as the existing record.
            return match find_record(&guard.db_pool, &actor_user_id, &method, &path, &key).await {
                Ok(Some(existing)) => handle_existing(existing, &request_hash),
                Ok(None) => ApiError::IdempotencyConflict(
                    "A request with this Idempotency-Key is already in progress".to_string(),
                )
                .into_response(),
                Err(e) => ApiError::from(e).into_response(),
            };
        }
        Err(e) => return ApiError::from(e).into_response(),
    }

    // If anything below fails or the request is cancelled mid-flight, the
    // pending record must not survive, or the key would be stuck
    // "in progress" forever.
    let mut pending = PendingRecord::new(guard.db_pool.clone(), record_id);

    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let body_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            // Pending record is cleaned up by the drop guard.
            return ApiError::InternalError("Failed to buffer response body".to_string())
                .into_response();
        }
    };

    if parts.status.is_server_error() {
        // A server error is not a valid thing to replay.
        pending.delete().await;
    } else {
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let location = parts
            .headers
            .get(header::LOCATION)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let body_text = String::from_utf8_lossy(&body_bytes).to_string();

        let persisted = complete_record(
            &guard.db_pool,
            record_id,
            parts.status.as_u16() as i32,
            &body_text,
            content_type.as_deref(),
            location.as_deref(),
        )
        .await;

        match persisted {
            Ok(()) => pending.disarm(),
            Err(e) => {
                tracing::error!("Failed to persist idempotency response: {}", e);
                pending.delete().await;
            }
        }
    }

    let mut response = Response::from_parts(parts, Body::from(body_bytes));
    response.headers_mut().insert(
        IDEMPOTENCY_REPLAYED_HEADER,
        HeaderValue::from_static("false"),
    );
    response
}

/// Deletes the pending record unless disarmed; the Drop impl covers
/// cancellation, where the middleware future is dropped mid-flight.
struct PendingRecord {
    db_pool: PgPool,
    record_id: Uuid,
    armed: bool,
}

impl PendingRecord {
    fn new(db_pool: PgPool, record_id: Uuid) -> Self {
        Self {
            db_pool,
            record_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    async fn delete(&mut self) {
        self.armed = false;
        if let Err(e) = delete_record(&self.db_pool, self.record_id).await {
            tracing::warn!("Failed to delete pending idempotency record: {}", e);
        }
    }
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let db_pool = self.db_pool.clone();
        let record_id = self.record_id;
        handle.spawn(async move {
            if let Err(e) = delete_record(&db_pool, record_id).await {
                tracing::warn!("Failed to delete pending idempotency record: {}", e);
            }
        });
    }
}

fn handle_existing(existing: IdempotencyRecord, request_hash: &str) -> Response {
    if existing.request_hash != request_hash {
        return ApiError::IdempotencyConflict(
            "Idempotency-Key is already used with a different payload".to_string(),
        )
        .into_response();
    }

    let status = match existing.response_status {
        Some(status) => status,
        None => {
            return ApiError::IdempotencyConflict(
                "A request with this Idempotency-Key is already in progress".to_string(),
            )
            .into_response();
        }
    };

    // Replay the stored response verbatim.
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status as u16).unwrap_or(StatusCode::OK));
    if let Some(content_type) = existing
        .response_content_type
        .as_deref()
        .filter(|v| !v.is_empty())
    {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    if let Some(location) = existing
        .response_location
        .as_deref()
        .filter(|v| !v.is_empty())
    {
        builder = builder.header(header::LOCATION, location);
    }
    builder = builder.header(IDEMPOTENCY_REPLAYED_HEADER, "true");

    builder
        .body(Body::from(existing.response_body.unwrap_or_default()))
        .unwrap_or_else(|_| {
            ApiError::InternalError("Failed to rebuild replayed response".to_string())
                .into_response()
        })
}

/// Mutating routes covered by the guard: the creation endpoints plus the
/// lifecycle POSTs beneath offers and loans.
fn is_protected(method: &str, path: &str) -> bool {
    if !method.eq_ignore_ascii_case("POST") {
        return false;
    }

    let path = normalize_path(path);
    if matches!(
        path.as_str(),
        "/api/items" | "/api/requests" | "/api/offers" | "/api/loans"
    ) {
        return true;
    }

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        ["api", "offers", _id, action] => {
            matches!(*action, "accept" | "reject" | "withdraw")
        }
        ["api", "loans", _id, action] => {
            matches!(
                *action,
                "start" | "return-request" | "return-confirm" | "return-cancel"
            )
        }
        _ => false,
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.len() > 1 {
        trimmed.trim_end_matches('/').to_string()
    } else {
        "/".to_string()
    }
}

fn validate_key(key: &str) -> Result<(), String> {
    if key.len() < MIN_KEY_LENGTH || key.len() > MAX_KEY_LENGTH {
        return Err(format!(
            "Idempotency-Key length must be between {} and {} characters",
            MIN_KEY_LENGTH, MAX_KEY_LENGTH
        ));
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("Idempotency-Key contains invalid characters".to_string());
    }
    Ok(())
}

fn compute_request_hash(content_type: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(body);
    hex::encode(hasher.finalize())
}

fn resolve_actor(guard: &IdempotencyGuard, request: &Request) -> String {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| guard.verifier.verify(token).ok())
        .map(|claims| claims.sub)
        .unwrap_or_else(|| "anonymous".to_string())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

async fn find_record(
    db_pool: &PgPool,
    actor_user_id: &str,
    method: &str,
    path: &str,
    key: &str,
) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
    sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        SELECT request_hash, response_status, response_body,
               response_content_type, response_location
        FROM idempotency_records
        WHERE actor_user_id = $1 AND method = $2 AND path = $3 AND idempotency_key = $4
        "#,
    )
    .bind(actor_user_id)
    .bind(method)
    .bind(path)
    .bind(key)
    .fetch_optional(db_pool)
    .await
}

#[allow(clippy::too_many_arguments)]
async fn insert_pending(
    db_pool: &PgPool,
    id: Uuid,
    actor_user_id: &str,
    method: &str,
    path: &str,
    key: &str,
    request_hash: &str,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO idempotency_records (
            id, actor_user_id, method, path, idempotency_key, request_hash,
            created_at, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(id)
    .bind(actor_user_id)
    .bind(method)
    .bind(path)
    .bind(key)
    .bind(request_hash)
    .bind(created_at)
    .bind(expires_at)
    .execute(db_pool)
    .await?;

    Ok(())
}

async fn complete_record(
    db_pool: &PgPool,
    id: Uuid,
    status: i32,
    body: &str,
    content_type: Option<&str>,
    location: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE idempotency_records
        SET response_status = $1, response_body = $2, response_content_type = $3,
            response_location = $4, completed_at = $5
        WHERE id = $6
        "#,
    )
    .bind(status)
    .bind(body)
    .bind(content_type)
    .bind(location)
    .bind(Utc::now())
    .bind(id)
    .execute(db_pool)
    .await?;

    Ok(())
}

async fn delete_record(db_pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM idempotency_records WHERE id = $1")
        .bind(id)
        .execute(db_pool)
        .await?;

    Ok(())
}

async fn purge_expired(db_pool: &PgPool, now: DateTime<Utc>) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= $1")
        .bind(now)
        .execute(db_pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_length() {
        assert!(validate_key("short").is_err());
        assert!(validate_key(&"k".repeat(129)).is_err());
        assert!(validate_key("a-perfectly-fine-key").is_ok());
        assert!(validate_key(&"k".repeat(8)).is_ok());
        assert!(validate_key(&"k".repeat(128)).is_ok());
    }

    #[test]
    fn test_validate_key_characters() {
        assert!(validate_key("has a space").is_err());
        assert!(validate_key("has\ttab-char").is_err());
        assert!(validate_key("has\ncontrol").is_err());
        assert!(validate_key("uuid-like-0c8e4f9a").is_ok());
    }

    #[test]
    fn test_is_protected_creation_routes() {
        assert!(is_protected("POST", "/api/items"));
        assert!(is_protected("POST", "/api/offers/"));
        assert!(is_protected("POST", "/api/loans"));
        assert!(!is_protected("GET", "/api/items"));
        assert!(!is_protected("POST", "/api/notifications"));
    }

    #[test]
    fn test_is_protected_lifecycle_routes() {
        assert!(is_protected("POST", "/api/offers/abc/accept"));
        assert!(is_protected("POST", "/api/offers/abc/withdraw"));
        assert!(is_protected("POST", "/api/loans/abc/start"));
        assert!(is_protected("POST", "/api/loans/abc/return-confirm"));
        assert!(!is_protected("POST", "/api/loans/abc/unknown"));
        assert!(!is_protected("POST", "/api/offers/abc/def/accept"));
    }

    #[test]
    fn test_request_hash_covers_content_type_and_body() {
        let base = compute_request_hash("application/json", b"{\"a\":1}");
        assert_eq!(base, compute_request_hash("application/json", b"{\"a\":1}"));
        assert_ne!(base, compute_request_hash("application/json", b"{\"a\":2}"));
        assert_ne!(base, compute_request_hash("text/plain", b"{\"a\":1}"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/api/items/"), "/api/items");
        assert_eq!(normalize_path("/api/items"), "/api/items");
        assert_eq!(normalize_path("/"), "/");
    }
}
