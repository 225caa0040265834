use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::users::{repo_types::StoreError, services::UserError};

/// Body shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "Invalid request",
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: "User not found",
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            error: "User already exists",
            message: message.into(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "Internal server error",
            message: "An unexpected error occurred".into(),
        }
    }
}

impl From<UserError> for ApiError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::Validation(msg) => ApiError::bad_request(msg),
            UserError::Conflict(msg) => ApiError::conflict(msg),
            UserError::NotFound(id) => ApiError::not_found(format!("no user with id {id}")),
            UserError::Store(StoreError::Duplicate(field)) => {
                ApiError::conflict(format!("{field} is already taken"))
            }
            UserError::Store(StoreError::NotFound) => ApiError::not_found("user no longer exists"),
            UserError::Hashing(detail) => {
                error!(error = %detail, "password hashing failed");
                ApiError::internal()
            }
            UserError::Store(StoreError::Database(e)) => {
                error!(error = %e, "database operation failed");
                ApiError::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
