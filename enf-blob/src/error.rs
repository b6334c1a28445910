use enf_core::EnfError;
use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during blob operations
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {id}")]
    NotFound { id: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Blob size {size} exceeds maximum {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl BlobError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Whether the caller sent something unacceptable, as opposed to storage failing.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Invalid { .. } | Self::TooLarge { .. })
    }
}

impl From<BlobError> for EnfError {
    fn from(err: BlobError) -> Self {
        if err.is_client_error() {
            EnfError::invalid_request(err.to_string())
        } else {
            EnfError::blob_access(err.to_string()).with_source(anyhow::Error::new(err))
        }
    }
}
