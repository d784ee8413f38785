//! Pool error types.

use thiserror::Error;

/// Result type for pool construction/configuration operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors the pool can recover from without panicking.
///
/// Most runtime outcomes (admission drops, transport failures, HTTP error
/// statuses) are delivered as [`crate::Response`] values rather than as
/// `Err`s here -- the pool, not its caller, owns retry/drop policy. This
/// type is reserved for construction and configuration misuse.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No valid endpoint hostnames were supplied.
    #[error("no valid endpoints configured")]
    NoEndpoints,

    /// An endpoint hostname failed to parse as a base URL.
    #[error("invalid endpoint url {0:?}: {1}")]
    InvalidEndpoint(String, http::uri::InvalidUri),

    /// Client certificate material was malformed or inconsistent.
    #[error("invalid client certificate configuration: {0}")]
    InvalidClientCert(String),
}
