// ================================================================
// File: couponbot-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Uuid error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("No coupons available")]
    NoCouponsAvailable,

    #[error("Invalid identity token: {0}")]
    InvalidIdentity(String),

    /// Every candidate was claimed by someone else before we could mark it.
    #[error("Coupon pool contention after {0} attempts")]
    Contention(u32),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

/// What a coupon request can fail with, as seen by whoever renders the result.
///
/// Store and network errors never leave the orchestration layer in their raw
/// form; they are folded into one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimFailure {
    #[error("No coupons available at this time")]
    NoCouponsAvailable,

    #[error("Identity token is missing or malformed")]
    InvalidIdentity,

    #[error("Temporary failure, please retry: {0}")]
    TransientFailure(String),
}

impl ClaimFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClaimFailure::TransientFailure(_))
    }
}

impl From<Error> for ClaimFailure {
    fn from(err: Error) -> Self {
        match err {
            Error::NoCouponsAvailable => ClaimFailure::NoCouponsAvailable,
            Error::InvalidIdentity(_) => ClaimFailure::InvalidIdentity,
            other => ClaimFailure::TransientFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_become_transient() {
        let failure: ClaimFailure = Error::Database(sqlx::Error::PoolTimedOut).into();
        assert!(failure.is_retryable());

        let failure: ClaimFailure = Error::Contention(5).into();
        assert!(matches!(failure, ClaimFailure::TransientFailure(_)));
    }

    #[test]
    fn test_domain_errors_keep_their_kind() {
        assert_eq!(ClaimFailure::from(Error::NoCouponsAvailable), ClaimFailure::NoCouponsAvailable);
        assert_eq!(
            ClaimFailure::from(Error::InvalidIdentity("".into())),
            ClaimFailure::InvalidIdentity
        );
        assert!(!ClaimFailure::NoCouponsAvailable.is_retryable());
    }
}
