//! Error types for Shortstack

/// Result type alias for Shortstack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Shortstack
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input surfaced to the caller
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// Malformed short code surfaced to the caller
    #[error("invalid short code: {0}")]
    InvalidCode(String),
    /// Unknown short code
    #[error("short code not found")]
    NotFound,
    /// Relational store errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Columnar store errors
    #[error("columnar store error: {0}")]
    Columnar(#[from] clickhouse::error::Error),
    /// Cache errors
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
    /// Message bus errors
    #[error("bus error: {0}")]
    Bus(#[from] rdkafka::error::KafkaError),
    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Map to a gRPC status. Internal details are sanitized; only
    /// caller-addressable errors keep their message.
    pub fn into_status(self) -> tonic::Status {
        match self {
            Error::InvalidUrl(_) | Error::InvalidCode(_) => {
                tonic::Status::invalid_argument(self.to_string())
            }
            Error::NotFound => tonic::Status::not_found("short code not found"),
            _ => tonic::Status::internal("Internal Server Error"),
        }
    }

    /// Caller-safe message, used for per-entry errors in batch responses.
    pub fn public_message(&self) -> String {
        match self {
            Error::InvalidUrl(_) | Error::InvalidCode(_) | Error::NotFound => self.to_string(),
            _ => "Internal Server Error".to_string(),
        }
    }
}
