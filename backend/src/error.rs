use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("user store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = %self, "request failed");

        // Store errors carry file paths; those stay in the log.
        (status, "internal server error").into_response()
    }
}
