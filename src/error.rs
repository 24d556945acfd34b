use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoyaltyError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Conflict: {0}")]
    ConflictError(String),
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },
    #[error("Storage error: {0}")]
    StorageError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),
    #[error("Background task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, LoyaltyError>;

impl LoyaltyError {
    /// Wraps any backend failure as a storage error.
    pub fn storage<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::StorageError(error.into())
    }

    /// Transport-neutral status code the outer layer reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationError(_) => 422,
            Self::ConflictError(_) => 409,
            Self::AuthenticationError(_) => 401,
            Self::InsufficientFunds { .. } => 402,
            Self::ConfigError(_) => 400,
            Self::StorageError(_)
            | Self::CsvError(_)
            | Self::IoError(_)
            | Self::ArithmeticOverflow(_)
            | Self::TaskError(_) => 500,
        }
    }

    /// Message safe to show an end user. Internal failures never leak detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::StorageError(_)
            | Self::TaskError(_)
            | Self::IoError(_)
            | Self::ArithmeticOverflow(_) => "internal service failure".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LoyaltyError {
    fn from(error: rocksdb::Error) -> Self {
        Self::storage(error)
    }
}

impl From<serde_json::Error> for LoyaltyError {
    fn from(error: serde_json::Error) -> Self {
        Self::storage(error)
    }
}
