//! Business error carrying a numeric code for API responses

use thiserror::Error;

/// Code used when a caller has no more specific one
pub const DEFAULT_CODE: i32 = 7;

/// Error with a client-facing code and message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{msg}")]
pub struct CodeError {
    pub code: i32,
    pub msg: String,
}

impl CodeError {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    /// Error with [`DEFAULT_CODE`]
    pub fn with_default_code(msg: impl Into<String>) -> Self {
        Self::new(DEFAULT_CODE, msg)
    }
}
