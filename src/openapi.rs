use crate::{errors, handlers};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mycoshop API",
        description = "Checkout, inventory reservation, orders, and payment reconciliation for the mushroom storefront",
    ),
    paths(
        handlers::checkout::create_checkout_session,
        handlers::orders::get_order,
        handlers::webhooks::stripe_webhook,
        handlers::auth::register,
        handlers::auth::login,
    ),
    components(schemas(
        handlers::checkout::CreateCheckoutRequest,
        handlers::checkout::CheckoutItemRequest,
        handlers::checkout::CheckoutSessionResponse,
        handlers::orders::OrderResponse,
        handlers::orders::OrderItemResponse,
        handlers::auth::RegisterRequest,
        handlers::auth::LoginRequest,
        handlers::auth::AuthResponse,
        handlers::auth::CustomerResponse,
        errors::ErrorResponse,
    )),
    tags(
        (name = "checkout", description = "Cart to pending order to provider session"),
        (name = "orders", description = "Order lookup"),
        (name = "webhooks", description = "Payment provider event ingestion"),
        (name = "auth", description = "Customer accounts and sessions"),
    )
)]
pub struct ApiDoc;
