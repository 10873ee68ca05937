//! HTTP error type.
//!
//! Bridges [`BookingError`] to JSON error responses through Axum's
//! `IntoResponse`.

use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::BookingError;

/// Error returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (logged, not exposed to the client)
    source: Option<anyhow::Error>,
}

impl ApiError {
    /// Create a new error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 401 Unauthorized
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// 422 Unprocessable Entity
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    /// Status code of the response
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<BookingError> for ApiError {
    fn from(error: BookingError) -> Self {
        let message = error.to_string();
        let api = match &error {
            BookingError::InputValidation(_) => Self::validation(message),
            BookingError::CapacityExceeded { .. } => Self::new(StatusCode::CONFLICT, "CAPACITY_EXCEEDED", message),
            BookingError::InvalidTransition { .. } => Self::new(StatusCode::CONFLICT, "INVALID_TRANSITION", message),
            BookingError::PaymentMismatch { .. } => Self::new(StatusCode::BAD_REQUEST, "PAYMENT_MISMATCH", message),
            BookingError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            BookingError::DownstreamUnavailable { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
            },
            // Internal detail goes to the log only
            BookingError::Internal(_) => Self::internal("internal error"),
        };
        api.with_source(anyhow::Error::new(error))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Internal server error"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookingReference, TicketStatus};

    #[test]
    fn booking_errors_map_to_statuses() {
        let cases = [
            (BookingError::invalid("bad"), StatusCode::UNPROCESSABLE_ENTITY),
            (
                BookingError::CapacityExceeded {
                    requested: 3,
                    available: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                BookingError::transition(&BookingReference::from("R"), TicketStatus::CheckedIn, "cancel", "late"),
                StatusCode::CONFLICT,
            ),
            (
                BookingError::PaymentMismatch {
                    reference: BookingReference::from("R"),
                    reason: "signature".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (BookingError::ticket_not_found(&BookingReference::from("R")), StatusCode::NOT_FOUND),
            (
                BookingError::DownstreamUnavailable {
                    service: "catalog",
                    message: "breaker open".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (BookingError::Internal("lock poisoned".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let api = ApiError::from(BookingError::Internal("ledger corrupted".to_string()));
        assert_eq!(api.to_string(), "[INTERNAL_SERVER_ERROR] internal error");
        assert!(std::error::Error::source(&api).is_some());
    }
}
