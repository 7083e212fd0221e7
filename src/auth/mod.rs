use axum::{async_trait, extract::FromRequestParts, http::request::Parts, RequestPartsExt};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Access tokens live for a day; there is no refresh flow.
const ACCESS_TOKEN_MINUTES: i64 = 24 * 60;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,      // Subject (user ID)
    pub exp: i64,         // Expiration time
    pub iat: i64,         // Issued at
    pub username: String, // Username for convenience
}

impl Claims {
    pub fn new(user_id: Uuid, username: String, expiration_minutes: i64) -> Self {
        let now = Utc::now();
        let exp = now + Duration::minutes(expiration_minutes);

        Claims {
            sub: user_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            username,
        }
    }

    pub fn user_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth("Invalid user ID in token".into()))
    }
}

// ============================================================================
// JWT Operations
// ============================================================================

pub fn create_access_token(user_id: Uuid, username: String, secret: &str) -> AppResult<String> {
    let claims = Claims::new(user_id, username, ACCESS_TOKEN_MINUTES);

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("Failed to create JWT: {:?}", e);
        AppError::Internal
    })
}

pub fn validate_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!("Token validation failed: {:?}", e);
        AppError::Auth("Invalid or expired token".into())
    })
}

// ============================================================================
// Password Hashing
// ============================================================================

pub fn hash_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| {
        tracing::error!("Failed to hash password: {:?}", e);
        AppError::Internal
    })
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    bcrypt::verify(password, hash).map_err(|e| {
        tracing::error!("Failed to verify password: {:?}", e);
        AppError::Internal
    })
}

// ============================================================================
// Auth Extractor
// ============================================================================

/// The authenticated caller. Every link and tag query is scoped by
/// `user_id`, so extracting this is the ownership boundary.
///
/// Rejects with 401 before the request body is read, which keeps
/// unauthenticated requests free of side effects.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Auth("Missing or invalid Authorization header".into()))?;

        let claims = validate_token(bearer.token(), &state.jwt_secret)?;
        let user_id = claims.user_id()?;

        Ok(AuthUser {
            user_id,
            username: claims.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-at-least-32-chars!!";

    #[test]
    fn token_round_trips_user_id_and_username() {
        let user_id = Uuid::new_v4();
        let token = create_access_token(user_id, "alice".into(), SECRET).unwrap();

        let claims = validate_token(&token, SECRET).unwrap();
        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.username, "alice");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = create_access_token(Uuid::new_v4(), "bob".into(), SECRET).unwrap();
        let err = validate_token(&token, "a-completely-different-secret-value").unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = Claims::new(Uuid::new_v4(), "carol".into(), -10);
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(validate_token(&token, SECRET).is_err());
    }

    #[test]
    fn garbage_subject_is_an_auth_error() {
        let claims = Claims {
            sub: "not-a-uuid".into(),
            exp: 0,
            iat: 0,
            username: "x".into(),
        };
        assert!(matches!(claims.user_id(), Err(AppError::Auth(_))));
    }

    #[test]
    fn password_hash_verifies() {
        let hash = bcrypt::hash("hunter22", 4).unwrap();
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }
}
