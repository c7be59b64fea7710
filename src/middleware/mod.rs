//! Middleware for the LendCircle API
//!
//! This module provides middleware for request tracing, idempotency-key
//! replay, security headers, and authentication.

pub mod auth;
mod idempotency;
mod security;
mod tracing;

pub use auth::{AuthClaims, AuthVerifier, AuthenticatedUser};
pub use idempotency::{idempotency_guard, IdempotencyGuard};
pub use security::security_headers;
pub use tracing::request_tracing;
