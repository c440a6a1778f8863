use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bond_common::{BondError, ErrorKind};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// API Result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Bond(#[from] BondError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Bond(e) => match e.kind() {
                ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
                ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorKind::InvalidState | ErrorKind::AlreadyExists | ErrorKind::Conflict => {
                    StatusCode::CONFLICT
                }
                ErrorKind::StoreFailure => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// Convert ApiError to HTTP response. Store failures are logged and never echoed.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}
