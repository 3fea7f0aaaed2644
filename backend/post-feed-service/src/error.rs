/// Error types for post-feed-service
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Post id generation exhausted after {0} attempts")]
    IdExhausted(u32),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unauthenticated: caller identity required")]
    Unauthenticated,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Request canceled")]
    Canceled,

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeedError {
    /// "Not found" is a normal control-flow signal for id generation and
    /// relation lookups; every other store failure propagates as-is.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::NotFound(_))
    }

    /// Stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::NotFound(_) => "not_found",
            FeedError::Conflict(_) => "conflict",
            FeedError::IdExhausted(_) => "id_exhausted",
            FeedError::PermissionDenied(_) => "permission_denied",
            FeedError::Unauthenticated => "unauthenticated",
            FeedError::InvalidArgument(_) => "invalid_argument",
            FeedError::Canceled => "canceled",
            FeedError::DeadlineExceeded => "deadline_exceeded",
            FeedError::Unavailable(_) => "unavailable",
            FeedError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for FeedError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => FeedError::NotFound("row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                FeedError::Conflict(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                FeedError::Unavailable(err.to_string())
            }
            other => FeedError::Internal(format!("Database error: {}", other)),
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Internal(format!("Serialization error: {}", err))
    }
}

/// Convert FeedError to tonic::Status for gRPC responses
impl From<FeedError> for tonic::Status {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::NotFound(msg) => tonic::Status::not_found(msg),
            FeedError::Conflict(msg) => tonic::Status::already_exists(msg),
            e @ FeedError::IdExhausted(_) => tonic::Status::resource_exhausted(e.to_string()),
            FeedError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            e @ FeedError::Unauthenticated => tonic::Status::unauthenticated(e.to_string()),
            FeedError::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            e @ FeedError::Canceled => tonic::Status::cancelled(e.to_string()),
            e @ FeedError::DeadlineExceeded => tonic::Status::deadline_exceeded(e.to_string()),
            FeedError::Unavailable(msg) => tonic::Status::unavailable(msg),
            FeedError::Internal(msg) => tonic::Status::internal(msg),
        }
    }
}

/// Result type alias for feed operations
pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlx_row_not_found_is_control_flow() {
        let err: FeedError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_pool_timeout_maps_to_unavailable() {
        let err: FeedError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, FeedError::Unavailable(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_status_codes() {
        let status: tonic::Status = FeedError::PermissionDenied("not author".into()).into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);

        let status: tonic::Status = FeedError::IdExhausted(10).into();
        assert_eq!(status.code(), tonic::Code::ResourceExhausted);

        let status: tonic::Status = FeedError::DeadlineExceeded.into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
    }
}
