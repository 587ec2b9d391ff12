use ctrl_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("environment not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl ApiError {
    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Core(CoreError::InvalidArgument(_)) => 400,
            ApiError::Core(CoreError::AlreadyRunning(_)) => 409,
            ApiError::Core(CoreError::ChannelClosed(_)) => 503,
            ApiError::Internal(_) | ApiError::Core(_) => 500,
        }
    }
}

#[cfg(feature = "http")]
impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
