//! # Errors
//!
//! The ENF locator carries one structured error type through every layer.
//! Core goals:
//! - a closed taxonomy (`ErrorKind`) with stable status codes and class names
//! - can be carried through `anyhow::Error` and recovered with a downcast
//! - transport-agnostic (the HTTP layer decides how to serialize)

use std::fmt;

use anyhow::Error as AnyError;
use serde_json::Value;

/// Result type for operations that fail with an [`EnfError`].
pub type EnfResult<T> = std::result::Result<T, EnfError>;

/// Error classes the system distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,    // 400
    UnknownDataset,    // 404
    MatchFailure,      // 422
    Internal,          // 500
    BlobAccessFailure, // 502
    ProviderFailure,   // 502
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::UnknownDataset => 404,
            ErrorKind::MatchFailure => 422,
            ErrorKind::Internal => 500,
            ErrorKind::BlobAccessFailure => 502,
            ErrorKind::ProviderFailure => 502,
        }
    }

    /// Error `name` (e.g. "UnknownDataset")
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::UnknownDataset => "UnknownDataset",
            ErrorKind::MatchFailure => "MatchFailure",
            ErrorKind::Internal => "Internal",
            ErrorKind::BlobAccessFailure => "BlobAccessFailure",
            ErrorKind::ProviderFailure => "ProviderFailure",
        }
    }

    /// Error `className` (kebab-cased)
    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid-request",
            ErrorKind::UnknownDataset => "unknown-dataset",
            ErrorKind::MatchFailure => "match-failure",
            ErrorKind::Internal => "internal",
            ErrorKind::BlobAccessFailure => "blob-access-failure",
            ErrorKind::ProviderFailure => "provider-failure",
        }
    }
}

/// A structured error that can live inside `anyhow::Error`.
///
/// Fields:
/// - kind (drives name, code and class name)
/// - message
/// - data (optional, returned to clients)
/// - source (optional, never returned to clients)
#[derive(Debug)]
pub struct EnfError {
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<Value>,
    pub source: Option<AnyError>,
}

impl EnfError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
            source: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Convert into `anyhow::Error` for application glue.
    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Downcast an `anyhow::Error` to an `EnfError` if possible.
    pub fn from_anyhow(err: &AnyError) -> Option<&EnfError> {
        err.chain().find_map(|e| e.downcast_ref::<EnfError>())
    }

    /// Copy suitable for returning to clients: the inner `source` is dropped.
    pub fn sanitize_for_client(&self) -> EnfError {
        EnfError {
            kind: self.kind,
            message: self.message.clone(),
            data: self.data.clone(),
            source: None,
        }
    }

    /// JSON payload returned to clients.
    pub fn to_json(&self) -> Value {
        let mut base = serde_json::json!({
            "name": self.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.class_name(),
        });

        if let Some(d) = &self.data {
            base["data"] = d.clone();
        }
        base
    }

    // ---- Constructors ----

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, msg)
    }
    pub fn unknown_dataset(name: &str) -> Self {
        Self::new(ErrorKind::UnknownDataset, format!("Dataset '{name}' not found."))
            .with_data(serde_json::json!({ "dataset": name }))
    }
    pub fn provider_failure(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderFailure, msg)
    }
    pub fn blob_access(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BlobAccessFailure, msg)
    }
    pub fn match_failure(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::MatchFailure, msg)
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }
}

impl fmt::Display for EnfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.code(), self.message)
    }
}

impl std::error::Error for EnfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
