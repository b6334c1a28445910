use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use enf_core::EnfError;
use tracing::error;

#[derive(Debug)]
pub struct ApiError(pub anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<EnfError> for ApiError {
    fn from(e: EnfError) -> Self {
        Self(e.into_anyhow())
    }
}

impl From<enf_blob::BlobError> for ApiError {
    fn from(e: enf_blob::BlobError) -> Self {
        EnfError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Structured errors keep their kind, even under anyhow context.
        let safe = match EnfError::from_anyhow(&self.0) {
            Some(enf) => enf.sanitize_for_client(),
            None => EnfError::internal(self.0.to_string()),
        };

        let status =
            StatusCode::from_u16(safe.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = ?self.0, "request failed");
        }
        (status, Json(safe.to_json())).into_response()
    }
}
