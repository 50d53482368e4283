pub mod auth;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod webhooks;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};

/// All versioned API routes, nested under `/api/v1` by the caller.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/checkout/session", post(checkout::create_checkout_session))
        .route("/orders/:id", get(orders::get_order))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
}
