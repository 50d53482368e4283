use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body returned on every non-2xx response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Conflict", "Unprocessable Entity")
    #[schema(example = "Conflict")]
    pub error: String,
    /// Machine-readable error code the storefront can branch on
    #[schema(example = "OUT_OF_STOCK")]
    pub code: String,
    /// Human-readable error description
    #[schema(example = "Insufficient stock for SKU LC-100-DRY")]
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2025-01-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown SKU: {0}")]
    SkuNotFound(String),

    #[error("Insufficient stock for SKU {0}")]
    OutOfStock(String),

    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::SkuNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::OutOfStock(_) | Self::DuplicateRequest(_) => StatusCode::CONFLICT,
            Self::AuthError(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidSignature => StatusCode::BAD_REQUEST,
            Self::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::ConfigError(_)
            | Self::EventError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code the storefront branches on to render an actionable message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::SkuNotFound(_) => "SKU_NOT_FOUND",
            Self::OutOfStock(_) => "OUT_OF_STOCK",
            Self::DuplicateRequest(_) => "DUPLICATE_REQUEST",
            Self::AuthError(_) => "UNAUTHORIZED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::PaymentProvider(_) => "PAYMENT_PROVIDER_ERROR",
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Message suitable for HTTP responses. Internal and security errors are
    /// reported generically so nothing about the failure leaks to the caller.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::EventError(_) => {
                "Internal server error".to_string()
            }
            Self::InvalidSignature => "Invalid signature".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
