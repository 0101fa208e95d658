//! Error taxonomy shared by every auth-core operation.

use thiserror::Error;

/// Generic message for any credential failure. Internal causes (unknown
/// email, wrong password, disabled account) are never distinguished at the
/// boundary.
pub const INVALID_CREDENTIALS: &str = "invalid email or password";

/// Generic message for any token failure (expired, tampered, revoked,
/// wrong purpose).
pub const INVALID_TOKEN: &str = "invalid or expired token";

/// Generic message for a failed second-factor check.
pub const INVALID_CODE: &str = "invalid verification code";

/// Convenience alias for auth-core results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors surfaced by the auth core.
///
/// `Unauthenticated` ("log in again") is deliberately distinct from a
/// missing permission, which callers derive from the resolved permission
/// set; the two map to different rejection statuses upstream.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl AuthError {
    /// Credential failure with the normalized message.
    #[must_use]
    pub fn invalid_credentials() -> Self {
        Self::Unauthenticated(INVALID_CREDENTIALS.to_string())
    }

    /// Token failure with the normalized message.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::Unauthenticated(INVALID_TOKEN.to_string())
    }

    /// Second-factor failure with the normalized message.
    #[must_use]
    pub fn invalid_code() -> Self {
        Self::Unauthenticated(INVALID_CODE.to_string())
    }

    /// True for any failure that should be answered with "log in again".
    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated(_))
    }
}
