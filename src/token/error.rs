//! Token signing and verification errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("error signing token: {0}")]
    Signing(String),

    #[error("error decoding token: {0}")]
    Malformed(String),

    #[error("token signature is invalid")]
    SignatureInvalid,

    #[error("unsupported token algorithm {found}, expected {expected}")]
    UnsupportedAlgorithm { found: String, expected: String },

    #[error("token expired at {expiration} (unix millis)")]
    Expired { expiration: i64 },
}
