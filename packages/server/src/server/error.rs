//! HTTP mapping of trellis errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use trellis::{ActionError, ErrorClass, RunError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Page(#[from] RunError),

    #[error("invalid request body: {0}")]
    Body(String),

    #[error("action task aborted: {0}")]
    Aborted(String),
}

/// Status code for an error class.
pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Request | ErrorClass::Codec => StatusCode::BAD_REQUEST,
        ErrorClass::Registration => StatusCode::NOT_FOUND,
        ErrorClass::Execution | ErrorClass::Transport => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Action(err) => status_for(err.class()),
            AppError::Page(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Body(_) => StatusCode::BAD_REQUEST,
            AppError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            // Job errors may carry upstream details; keep them in the logs.
            (status, "internal server error").into_response()
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
            (status, self.to_string()).into_response()
        }
    }
}
