use axum::{extract::State, http::StatusCode, Json};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::extract::ApiJson;
use crate::{
    auth::{create_access_token, hash_password, verify_password},
    error::{AppError, AppResult},
    models::{User, UserDto},
    state::AppState,
};

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("username regex is valid"));

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(
        length(min = 3, max = 32, message = "Username must be 3-32 characters"),
        regex(
            path = *USERNAME_RE,
            message = "Username may only contain letters, digits, '_', '.' and '-'"
        )
    )]
    pub username: String,
    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: UserDto,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    req.validate()?;

    info!("Registering new user: {}", req.username);

    let password_hash = hash_password(&req.password)?;

    // A taken username trips users_username_key and maps to 409.
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, password_hash)
         VALUES ($1, $2)
         RETURNING id, username, password_hash, created_at",
    )
    .bind(&req.username)
    .bind(&password_hash)
    .fetch_one(&state.pool)
    .await?;

    info!("User created: {} ({})", user.username, user.id);

    let access_token = create_access_token(user.id, user.username.clone(), &state.jwt_secret)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            access_token,
            user: user.into(),
        }),
    ))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    info!("Login attempt for user: {}", req.username);

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, created_at FROM users WHERE username = $1",
    )
    .bind(&req.username)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::Auth("Invalid username or password".into()))?;

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(AppError::Auth("Invalid username or password".into()));
    }

    info!("Login successful: {} ({})", user.username, user.id);

    let access_token = create_access_token(user.id, user.username.clone(), &state.jwt_secret)?;

    Ok(Json(AuthResponse {
        access_token,
        user: user.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(username: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            password: password.into(),
        }
    }

    #[test]
    fn accepts_reasonable_credentials() {
        assert!(register("alice_01", "password123").validate().is_ok());
    }

    #[test]
    fn rejects_short_username() {
        assert!(register("al", "password123").validate().is_err());
    }

    #[test]
    fn rejects_username_with_spaces() {
        assert!(register("alice smith", "password123").validate().is_err());
    }

    #[test]
    fn rejects_short_password() {
        assert!(register("alice", "short").validate().is_err());
    }
}
