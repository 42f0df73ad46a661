//! Authentication module
//!
//! HS256 JWT minting for services that hand tokens to their clients, plus a
//! matching decoder.

use thiserror::Error;

pub mod jwt;

pub use jwt::{decode_jwt_token, new_jwt_token, JwtIssuer, TokenOption};

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Failed to sign token: {0}")]
    SigningError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        assert_eq!(AuthError::TokenExpired.to_string(), "Token expired");
        assert_eq!(
            AuthError::InvalidToken("bad".into()).to_string(),
            "Invalid token: bad"
        );
    }
}
