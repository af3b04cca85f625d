//! Signed access tokens carrying the caller's role.

use std::time::Duration;

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::roles::Role;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing access token")]
    Missing,
    #[error("invalid access token")]
    Invalid,
    #[error("expired access token")]
    Expired,
    #[error("operation requires the admin role")]
    Forbidden,
    #[error("failed to issue token: {0}")]
    Issue(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: i64,
    user_type: String,
    exp: i64,
}

/// Authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub role: Role,
}

impl Principal {
    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    pub fn only_active(&self) -> bool {
        self.role.only_active()
    }
}

/// HS256 token issuance and validation with a shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    default_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, default_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn issue(&self, user_id: i64, role: Role) -> Result<String, AuthError> {
        let expires_at = OffsetDateTime::now_utc() + self.default_ttl;
        self.issue_until(user_id, role, expires_at)
    }

    pub fn issue_until(
        &self,
        user_id: i64,
        role: Role,
        expires_at: OffsetDateTime,
    ) -> Result<String, AuthError> {
        let claims = Claims {
            user_id,
            user_type: role.as_str().to_string(),
            exp: expires_at.unix_timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AuthError::Issue(err.to_string()))
    }

    pub fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            }
        })?;

        Ok(Principal {
            user_id: data.claims.user_id,
            role: Role::from_claim(&data.claims.user_type),
        })
    }
}
