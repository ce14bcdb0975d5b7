//! Error types for routing operations

use crate::state::QuotaSummary;

/// Errors surfaced to callers of the router.
///
/// Quota-related upstream failures never appear here individually: they are
/// absorbed by fallback and only show up as `AllExhausted` once nothing is left.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable credentials (or models) were configured. Raised before any
    /// quota state is read.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{summary}\nAll API keys and models are exhausted for today.\n{remediation}")]
    AllExhausted {
        summary: QuotaSummary,
        remediation: String,
    },

    /// A non-quota failure from the unit of work, passed through untouched.
    #[error("request failed on {model} (Key {}): {source}", .credential + 1)]
    Fatal {
        credential: usize,
        model: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("quota state storage error: {0}")]
    Storage(String),
}

/// Result alias for router operations.
pub type Result<T> = std::result::Result<T, Error>;
