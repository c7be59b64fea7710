//! Authentication middleware
//!
//! Token issuance lives in the external auth service; this middleware only
//! verifies bearer access tokens and extracts the acting user.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;

/// Claims carried by an access token
#[derive(Debug, Deserialize)]
pub struct AuthClaims {
    pub sub: String,
    pub exp: i64,
}

/// Verifies access tokens issued by the auth service
pub struct AuthVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthVerifier {
    /// Create a verifier for HS256 tokens signed with the shared secret
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a token and return its claims
    pub fn verify(&self, token: &str) -> Result<AuthClaims, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<AuthClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

/// Authenticated user extracted from the bearer token
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(user: AuthenticatedUser) -> impl IntoResponse {
///     format!("Hello, user {}", user.user_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    ApiError::Unauthorized(
                        "Authorization header with Bearer token required".to_string(),
                    )
                    .into_response()
                })?;

        let verifier = Arc::<AuthVerifier>::from_ref(state);

        let claims = verifier.verify(bearer.token()).map_err(|e| {
            let message = if e.to_string().contains("Expired") {
                "Token has expired"
            } else {
                "Invalid token"
            };
            ApiError::Unauthorized(message.to_string()).into_response()
        })?;

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| {
            ApiError::Unauthorized("Invalid user ID in token".to_string()).into_response()
        })?;

        Ok(AuthenticatedUser { user_id })
    }
}
