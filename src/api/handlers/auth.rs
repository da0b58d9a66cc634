//! Authentication handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::middleware::{AuthError, TOKEN_TTL_HOURS};
use crate::api::server::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
}

/// Exchange the admin credentials for a bearer token
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let admin = &state.config.admin;
    if req.username != admin.username || req.password != admin.password {
        warn!("Login failed for user: {}", req.username);
        return Err(AuthError::WrongCredentials);
    }

    let token = state.jwt_auth.generate_token(&req.username, TOKEN_TTL_HOURS)?;

    info!("User {} logged in", req.username);

    Ok((
        StatusCode::OK,
        Json(LoginResponse {
            token,
            expires_in: TOKEN_TTL_HOURS * 3600,
        }),
    ))
}
