use crate::errors::ServiceError;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use validator::Validate;

pub fn success_response<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(data))
}

pub fn created_response<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(data))
}

/// Runs derive-based validation, mapping failures to a 422 response.
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}
