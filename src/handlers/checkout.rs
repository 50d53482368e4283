use crate::{
    auth::MaybeAuthenticatedUser,
    errors::ServiceError,
    handlers::common,
    services::checkout::CheckoutLineInput,
    AppState,
};
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCheckoutRequest {
    /// Cart lines. Prices are resolved server-side from the catalog; the
    /// client only names SKUs and quantities.
    #[validate(length(min = 1, message = "at least one item is required"))]
    pub items: Vec<CheckoutItemRequest>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutItemRequest {
    #[validate(length(min = 1, message = "sku must not be empty"))]
    #[schema(example = "LC-100-DRY")]
    pub sku: String,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    #[schema(example = 2)]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub order_id: Uuid,
    #[schema(example = "MYC-3F2A9B41C07D")]
    pub order_number: String,
    #[schema(example = "cs_test_a1B2c3")]
    pub session_id: String,
    /// Hosted payment page the storefront redirects the customer to
    pub checkout_url: String,
}

/// Creates a pending order with reserved stock and a provider checkout
/// session. Guests may check out without a bearer token; a supplied
/// `Idempotency-Key` header makes retries safe.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/session",
    tag = "checkout",
    request_body = CreateCheckoutRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Client-chosen key making the request retry-safe"),
    ),
    responses(
        (status = 201, description = "Order created, session ready", body = CheckoutSessionResponse),
        (status = 409, description = "Out of stock or duplicate idempotency key", body = crate::errors::ErrorResponse),
        (status = 422, description = "Invalid input or unknown SKU", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment provider not configured", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider rejected the session", body = crate::errors::ErrorResponse),
    )
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    MaybeAuthenticatedUser(user): MaybeAuthenticatedUser,
    headers: HeaderMap,
    Json(payload): Json<CreateCheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    common::validate_input(&payload)?;
    for item in &payload.items {
        common::validate_input(item)?;
    }

    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);

    let items = payload
        .items
        .into_iter()
        .map(|item| CheckoutLineInput {
            sku: item.sku,
            quantity: item.quantity,
        })
        .collect();

    let outcome = state
        .services
        .checkout
        .create_checkout(user.map(|u| u.customer_id), items, idempotency_key)
        .await?;

    Ok(common::created_response(CheckoutSessionResponse {
        order_id: outcome.order_id,
        order_number: outcome.order_number,
        session_id: outcome.session_id,
        checkout_url: outcome.checkout_url,
    }))
}
