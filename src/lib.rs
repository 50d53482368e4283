pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod idempotency;
pub mod migrator;
pub mod openapi;
pub mod services;

use crate::{
    auth::AuthService,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    idempotency::IdempotencyGuard,
    services::checkout::CheckoutService,
    services::inventory::InventoryService,
    services::orders::OrderService,
    services::payments::StripeClient,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Service instances shared by all request handlers.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub inventory: Arc<InventoryService>,
    pub auth: Arc<AuthService>,
    pub idempotency: Arc<IdempotencyGuard>,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub services: AppServices,
}

impl AppState {
    /// Wires the service graph from a connected pool and loaded config.
    pub fn new(db: Arc<DbPool>, config: AppConfig, event_sender: EventSender) -> Self {
        let config = Arc::new(config);

        let orders = Arc::new(OrderService::new(db.clone(), Some(event_sender.clone())));
        let inventory = Arc::new(InventoryService::new(db.clone()));
        let auth = Arc::new(AuthService::new(
            &config.jwt_secret,
            Duration::from_secs(config.jwt_expiration as u64),
        ));
        let idempotency = Arc::new(IdempotencyGuard::new(Duration::from_secs(
            config.idempotency_ttl_secs,
        )));
        let stripe = StripeClient::from_config(&config).map(Arc::new);
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            orders.clone(),
            stripe,
            idempotency.clone(),
            event_sender.clone(),
            config.currency.clone(),
        ));

        Self {
            db,
            config,
            event_sender,
            services: AppServices {
                checkout,
                orders,
                inventory,
                auth,
                idempotency,
            },
        }
    }
}

/// Builds the complete application router: health, versioned API, and the
/// interactive API docs.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", handlers::api_router())
        .merge(
            SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness plus a database ping.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            tracing::error!(error = %e, "health check failed to reach database");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
