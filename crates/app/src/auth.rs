use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use therapy_log_core::types::UserRole;

use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenClaims {
    pub sub: String,
    pub user_type: UserRole,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Sign(jsonwebtoken::errors::Error),
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token expired")]
    Expired,
    #[error("token lifetime of {0} minutes is out of range")]
    Lifetime(i64),
}

/// Signs and validates HS256 access tokens.
///
/// Expiry is checked against the caller supplied clock rather than the
/// system time so that handlers and tests share one notion of "now".
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_minutes: i64,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_minutes: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl_minutes,
        }
    }

    pub fn issue(
        &self,
        user_id: &str,
        role: UserRole,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let expires_at = Duration::try_minutes(self.ttl_minutes)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or(TokenError::Lifetime(self.ttl_minutes))?;
        let claims = TokenClaims {
            sub: user_id.to_string(),
            user_type: role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(TokenError::Sign)
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(err.to_string()))?
            .claims;
        if claims.sub.is_empty() {
            return Err(TokenError::Invalid("missing_subject".to_string()));
        }
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("bcrypt failure: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
    #[error("password worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// bcrypt hashing on the blocking thread pool.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let password = password.to_string();
        let cost = self.cost;
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
        Ok(hashed)
    }

    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let password = password.to_string();
        let hash = hash.to_string();
        let matched = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
        Ok(matched)
    }
}

/// Caller identity taken from a valid Bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorUser {
    pub doctor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentUser {
    pub parent_id: String,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn credentials_rejected() -> ProblemResponse {
    ProblemResponse::unauthorized("invalid_credentials", "Could not validate credentials")
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(credentials_rejected)?;
        let claims = state.tokens().verify(token, state.now()).map_err(|err| {
            debug!(stage = "auth", error = %err, "rejected access token");
            credentials_rejected()
        })?;
        Ok(Self {
            user_id: claims.sub,
            role: claims.user_type,
        })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for DoctorUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        match user.role {
            UserRole::Doctor => Ok(Self {
                doctor_id: user.user_id,
            }),
            UserRole::Parent => Err(ProblemResponse::new(
                StatusCode::FORBIDDEN,
                "forbidden",
                "Access denied. Doctor privileges required.",
            )),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ParentUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        match user.role {
            UserRole::Parent => Ok(Self {
                parent_id: user.user_id,
            }),
            UserRole::Doctor => Err(ProblemResponse::new(
                StatusCode::FORBIDDEN,
                "forbidden",
                "Access denied. Parent privileges required.",
            )),
        }
    }
}
