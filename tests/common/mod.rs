#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use mycoshop_api::{
    app_router,
    config::AppConfig,
    db,
    entities::{product, product_variant},
    events, AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_signing_secret";

/// A fully wired application backed by a throwaway SQLite file.
///
/// The database must be file-based: with `sqlite::memory:` every pooled
/// connection would get its own empty database.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _db_dir: TempDir,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with<F>(customize: F) -> TestApp
where
    F: FnOnce(&mut AppConfig),
{
    let db_dir = tempfile::tempdir().expect("failed to create temp dir");
    let db_path = db_dir.path().join("mycoshop_test.db");
    let database_url = format!("sqlite://{}?mode=rwc", db_path.display());

    let mut cfg = AppConfig::new(
        database_url,
        TEST_JWT_SECRET.to_string(),
        3600,
        "127.0.0.1".to_string(),
        0,
        "test".to_string(),
    );
    customize(&mut cfg);

    let pool = Arc::new(
        db::establish_connection(&cfg.database_url)
            .await
            .expect("failed to open test database"),
    );
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations");

    let (event_sender, event_receiver) = events::channel(64);
    tokio::spawn(events::process_events(event_receiver));

    let state = AppState::new(pool, cfg, event_sender);
    TestApp {
        router: app_router(state.clone()),
        state,
        _db_dir: db_dir,
    }
}

impl TestApp {
    /// Sends a request through the router without binding a socket.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Sends raw bytes, used by webhook tests where the body must not be
    /// re-serialized.
    pub async fn request_raw(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(body))
            .expect("failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

/// Seeds a product with a single active variant and returns the variant.
pub async fn seed_variant(
    state: &AppState,
    sku: &str,
    price: Decimal,
    stock: i32,
) -> product_variant::Model {
    let now = Utc::now();
    let product = product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(format!("Product for {}", sku)),
        slug: Set(format!("product-{}", sku.to_lowercase())),
        description: Set(Some("Grown in the test forest".to_string())),
        active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*state.db)
    .await
    .expect("failed to seed product");

    product_variant::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product.id),
        sku: Set(sku.to_string()),
        name: Set(format!("{} variant", sku)),
        price: Set(price),
        weight_grams: Set(Some(100)),
        stock_quantity: Set(stock),
        active: Set(true),
        position: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*state.db)
    .await
    .expect("failed to seed variant")
}

/// A valid `Stripe-Signature` header for the given payload.
pub fn sign_webhook(payload: &[u8], secret: &str) -> String {
    let ts = Utc::now().timestamp().to_string();
    let sig = mycoshop_api::services::payments::compute_signature(&ts, payload, secret);
    format!("t={},v1={}", ts, sig)
}
