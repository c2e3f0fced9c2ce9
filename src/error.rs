//! Error types for the voter gateway
//!
//! Only `InvalidQuery` and `DataLoad` ever reach a caller. Everything the
//! external store does wrong is absorbed by `ExternalStoreClient` and shows
//! up only in the status counters.

/// Result alias used throughout the gateway.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The local roster could not be built. Fatal at startup.
    #[error("failed to load local data from {path}: {message}")]
    DataLoad { path: String, message: String },

    /// Caller input is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The external store cannot answer right now. Degrades to local-only results.
    #[error("site store unavailable: {0}")]
    StoreUnavailable(String),

    /// Connection-class failure inside the store client.
    #[error("connection error: {0}")]
    Connection(String),

    /// Configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// A lookup task died before producing an answer.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn data_load(path: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::DataLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        GatewayError::InvalidQuery(message.into())
    }

    /// Whether the error should be surfaced to the caller as a failure of their request.
    pub fn is_caller_visible(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidQuery(_) | GatewayError::DataLoad { .. }
        )
    }
}

/// Errors raised by a `SiteStore` backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached (refused, timed out, dropped, pool closed).
    #[error("connection failure: {0}")]
    Connection(String),

    /// The backend answered but the statement failed.
    #[error("query failure: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Connection(msg) => GatewayError::Connection(msg),
            StoreError::Query(msg) => GatewayError::StoreUnavailable(msg),
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(e.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_visible_errors() {
        assert!(GatewayError::invalid_query("x").is_caller_visible());
        assert!(GatewayError::data_load("a.json", "missing").is_caller_visible());
        assert!(!GatewayError::StoreUnavailable("down".into()).is_caller_visible());
        assert!(!GatewayError::Connection("refused".into()).is_caller_visible());
    }

    #[test]
    fn test_store_error_conversion() {
        let e: GatewayError = StoreError::Connection("refused".into()).into();
        assert_eq!(e, GatewayError::Connection("refused".into()));

        let e: GatewayError = StoreError::Query("syntax".into()).into();
        assert!(matches!(e, GatewayError::StoreUnavailable(_)));
    }
}
