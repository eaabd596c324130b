use reqwest::StatusCode;
use thiserror::Error as ThisError;
use uuid::Uuid;

use super::IsRetryable;

#[derive(Debug, ThisError)]
pub enum MagpieError {
    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),

    #[error("Upstream search errors: {0}")]
    UpstreamErrors(String),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Unknown or expired lease token: {0}")]
    UnknownLease(Uuid),

    #[error("Shard {shard} out of range (shard count {count})")]
    ShardOutOfRange { shard: usize, count: usize },

    #[error("Unexpected error: {0}")]
    UnexpectedError(String),
}

impl IsRetryable for MagpieError {
    fn is_retryable(&self) -> bool {
        match self {
            // Network-level failures and server-side errors are transient.
            MagpieError::ReqwestError(_) => true,
            MagpieError::UpstreamStatus(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            // The search API reports throttling and timeouts in-band through
            // the errors array on a 200. The queue's attempt bound decides
            // when these give up, not a single response.
            MagpieError::UpstreamErrors(_) => true,
            // An unavailable shard fails the write locally; the unit is
            // re-queued and the upsert makes redelivery safe.
            MagpieError::DatabaseError(_) => true,
            _ => false,
        }
    }
}
