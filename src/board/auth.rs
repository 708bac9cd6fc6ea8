//! Password hashing and bearer-session authentication.
//!
//! Session tokens are random UUIDs handed to the client once; the database
//! only ever sees their SHA-256 digest.

use anyhow::{Context, Result};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use sha2::{Digest, Sha256};

use super::api::{ApiError, SharedState};
use super::models::User;
use crate::errors::BoardError;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> Result<String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(BoardError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ))
        .into());
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// False for a wrong password and for a malformed stored hash alike.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

/// [`hash_password`] on the blocking pool; argon2 is CPU- and memory-bound.
pub async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("Password hashing task panicked")?
}

/// [`verify_password`] on the blocking pool.
pub async fn verify_password_blocking(password: String, stored_hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .context("Password verification task panicked")
}

pub fn new_session_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The signed-in user of a request. Rejects with 401 when the bearer token
/// is missing, unknown, or expired.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub token_digest: String,
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(BoardError::Unauthorized)?;
        let digest = token_digest(token);
        let lookup = digest.clone();
        let user = state
            .db
            .call(move |db| db.session_user(&lookup))
            .await?
            .ok_or(BoardError::Unauthorized)?;
        Ok(Self {
            user,
            token_digest: digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn test_short_password_rejected() {
        let err = hash_password("short").unwrap_err();
        assert!(matches!(BoardError::find(&err), Some(BoardError::Validation(_))));
    }

    #[tokio::test]
    async fn test_blocking_pool_hash_and_verify() {
        let hash = hash_password_blocking("correct horse".into()).await.unwrap();
        assert!(verify_password_blocking("correct horse".into(), hash.clone()).await.unwrap());
        assert!(!verify_password_blocking("wrong horse".into(), hash).await.unwrap());

        let err = hash_password_blocking("short".into()).await.unwrap_err();
        assert!(matches!(BoardError::find(&err), Some(BoardError::Validation(_))));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_token_digest_is_stable_hex() {
        let token = new_session_token();
        assert_eq!(token.len(), 32);
        let digest = token_digest(&token);
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, token_digest(&token));
        assert_ne!(digest, token_digest(&new_session_token()));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let (parts, _) = Request::builder()
            .header("authorization", "Bearer abc123")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("abc123"));

        let (parts, _) = Request::builder()
            .header("authorization", "Basic abc123")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), None);

        let (parts, _) = Request::builder().body(()).unwrap().into_parts();
        assert_eq!(bearer_token(&parts), None);
    }
}
