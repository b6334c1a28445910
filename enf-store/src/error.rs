use enf_core::EnfError;
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by range store backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid store request: {message}")]
    Invalid { message: String },

    #[cfg(feature = "sqlite")]
    #[error("Database error: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }
}

impl From<StoreError> for EnfError {
    fn from(err: StoreError) -> Self {
        EnfError::internal(format!("Reference store unavailable: {err}"))
            .with_source(anyhow::Error::new(err))
    }
}
