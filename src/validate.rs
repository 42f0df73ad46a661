//! Input validators

use crate::error::CodeError;
use lazy_static::lazy_static;
use regex_lite::Regex;

lazy_static! {
    static ref MOBILE: Regex = Regex::new(r"^1[1-9][0-9]{9}$").unwrap();
}

/// Check a mainland China mobile number
pub fn verify_mobile(mobile: &str) -> Result<(), CodeError> {
    if mobile.len() != 11 {
        return Err(CodeError::new(1, "mobile number must be 11 digits"));
    }
    if !MOBILE.is_match(mobile) {
        return Err(CodeError::new(1, "invalid mobile number format"));
    }
    Ok(())
}
