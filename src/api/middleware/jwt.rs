//! JWT authentication
//!
//! Tokens come from `Authorization: Bearer <token>` or, for EventSource
//! clients that cannot set headers, a `?token=` query parameter.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

/// Token lifetime handed out by the login endpoint
pub const TOKEN_TTL_HOURS: i64 = 24;

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (admin username)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl Claims {
    pub fn new(subject: &str, expiry_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: subject.to_string(),
            exp: (now + Duration::hours(expiry_hours)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

/// HS256 signer/validator
#[derive(Clone)]
pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtAuth {
    /// Build from a shared secret; an empty secret gets a random per-process key
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        let key = if secret.is_empty() {
            let mut key_bytes = [0u8; 32];
            OsRng.try_fill_bytes(&mut key_bytes).map_err(|e| {
                error!("Failed to generate random JWT key: {}", e);
                AuthError::TokenCreation
            })?;

            debug!("Generated random JWT secret; tokens will not survive a restart");
            key_bytes.to_vec()
        } else {
            secret.as_bytes().to_vec()
        };

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&key),
            decoding_key: DecodingKey::from_secret(&key),
        })
    }

    pub fn generate_token(&self, subject: &str, expiry_hours: i64) -> Result<String, AuthError> {
        let claims = Claims::new(subject, expiry_hours);

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            error!("Failed to generate JWT: {}", e);
            AuthError::TokenCreation
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("JWT validation failed: {}", e);
                AuthError::InvalidToken
            })
    }

    /// Strip the `Bearer ` prefix
    pub fn extract_token(authorization: &str) -> Option<&str> {
        authorization.strip_prefix("Bearer ")
    }

    /// Token from the `token` query parameter
    pub fn query_token(query: Option<&str>) -> Option<String> {
        url::form_urlencoded::parse(query?.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug)]
pub enum AuthError {
    WrongCredentials,
    TokenCreation,
    InvalidToken,
    MissingToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::WrongCredentials => (StatusCode::UNAUTHORIZED, "Invalid credentials"),
            AuthError::TokenCreation => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token")
            }
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Extractor for authenticated requests
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
    pub claims: Claims,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    JwtAuth: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = match parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        {
            Some(header) => JwtAuth::extract_token(header)
                .ok_or(AuthError::InvalidToken)?
                .to_string(),
            None => JwtAuth::query_token(parts.uri.query()).ok_or(AuthError::MissingToken)?,
        };

        let claims = JwtAuth::from_ref(state).validate_token(&token)?;

        Ok(AuthenticatedUser {
            username: claims.sub.clone(),
            claims,
        })
    }
}
