//! JWT minting
//!
//! Tokens are HS256 with a flat claim map: `iat`, `exp` and any extra
//! [`TokenOption`]s. Options are applied last, so they may override `iat` or
//! `exp`.
//!
//! # Example
//!
//! ```
//! use zero_common::auth::jwt::{decode_jwt_token, new_jwt_token, TokenOption};
//!
//! let token = new_jwt_token(
//!     "my-secret",
//!     chrono::Utc::now().timestamp(),
//!     3600,
//!     &[TokenOption::new("userId", 42)],
//! )
//! .unwrap();
//!
//! let claims = decode_jwt_token("my-secret", &token).unwrap();
//! assert_eq!(claims["userId"], 42);
//! ```

use super::AuthError;
use crate::config::JwtConfig;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};

/// Claim map carried by a token
pub type Claims = Map<String, Value>;

/// One extra claim
#[derive(Debug, Clone, PartialEq)]
pub struct TokenOption {
    pub key: String,
    pub value: Value,
}

impl TokenOption {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Sign an HS256 token issued at `iat` and expiring `seconds` later
pub fn new_jwt_token(
    secret: &str,
    iat: i64,
    seconds: i64,
    options: &[TokenOption],
) -> Result<String, AuthError> {
    let mut claims = Claims::new();
    claims.insert("exp".into(), Value::from(iat + seconds));
    claims.insert("iat".into(), Value::from(iat));
    for option in options {
        claims.insert(option.key.clone(), option.value.clone());
    }

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::SigningError(e.to_string()))
}

/// Verify signature and expiry, returning the claims
pub fn decode_jwt_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.validate_aud = false;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        _ => AuthError::InvalidToken(e.to_string()),
    })?;

    Ok(token_data.claims)
}

/// Mints tokens from a [`JwtConfig`] using the current time
#[derive(Debug, Clone)]
pub struct JwtIssuer {
    secret: String,
    expire_seconds: i64,
}

impl JwtIssuer {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            expire_seconds: config.expire_seconds,
        }
    }

    /// Sign a token issued now
    #[tracing::instrument(name = "auth.jwt.issue", skip(self, options), fields(claims = options.len()), err)]
    pub fn issue(&self, options: &[TokenOption]) -> Result<String, AuthError> {
        let iat = chrono::Utc::now().timestamp();
        new_jwt_token(&self.secret, iat, self.expire_seconds, options)
    }

    /// Verify a token signed with this issuer's secret
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode_jwt_token(&self.secret, token)
    }
}
