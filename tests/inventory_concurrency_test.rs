mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{seed_variant, spawn_app, spawn_app_with};
use mycoshop_api::services::inventory::InventoryService;
use rust_decimal_macros::dec;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// With starting stock S and per-request quantity Q, exactly floor(S / Q)
/// concurrent reservations may succeed. The decrement is a storage-level
/// conditional update, so no interleaving can oversell.
#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let app = spawn_app().await;
    let variant = seed_variant(&app.state, "LC-100-DRY", dec!(12.50), 10).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let db = app.state.db.clone();
        let variant_id = variant.id;
        handles.push(tokio::spawn(async move {
            InventoryService::reserve_stock(&*db, variant_id, 3).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            succeeded += 1;
        }
    }

    // floor(10 / 3) = 3
    assert_eq!(succeeded, 3);

    let remaining = app
        .state
        .services
        .inventory
        .stock_for_sku("LC-100-DRY")
        .await
        .unwrap();
    assert_eq!(remaining, Some(1));
}

#[tokio::test]
async fn concurrent_checkouts_fail_cleanly_once_stock_runs_out() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_race_1",
            "url": "https://checkout.test/pay/cs_race_1",
            "payment_intent": null
        })))
        .mount(&stripe)
        .await;
    let app = spawn_app_with(|cfg| {
        cfg.stripe.secret_key = Some("sk_test_123".to_string());
        cfg.stripe.api_base = stripe.uri();
    })
    .await;

    seed_variant(&app.state, "RE-250-EXT", dec!(30.00), 5).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            let request = Request::builder()
                .method("POST")
                .uri("/api/v1/checkout/session")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"items": [{"sku": "RE-250-EXT", "quantity": 2}]}).to_string(),
                ))
                .unwrap();
            router.oneshot(request).await.unwrap().status()
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status: {}", other),
        }
    }

    // floor(5 / 2) = 2 winners; everyone else gets OUT_OF_STOCK.
    assert_eq!(created, 2);
    assert_eq!(conflicts, 6);

    let remaining = app
        .state
        .services
        .inventory
        .stock_for_sku("RE-250-EXT")
        .await
        .unwrap();
    assert_eq!(remaining, Some(1));
}

#[tokio::test]
async fn reservation_of_more_than_stock_is_refused() {
    let app = spawn_app().await;
    let variant = seed_variant(&app.state, "SH-500-CAP", dec!(18.00), 4).await;

    let reserved = InventoryService::reserve_stock(&*app.state.db, variant.id, 5)
        .await
        .unwrap();
    assert!(!reserved);

    // Refused reservations leave the row untouched.
    let remaining = app
        .state
        .services
        .inventory
        .stock_for_sku("SH-500-CAP")
        .await
        .unwrap();
    assert_eq!(remaining, Some(4));

    let reserved = InventoryService::reserve_stock(&*app.state.db, variant.id, 4)
        .await
        .unwrap();
    assert!(reserved);
    let remaining = app
        .state
        .services
        .inventory
        .stock_for_sku("SH-500-CAP")
        .await
        .unwrap();
    assert_eq!(remaining, Some(0));
}
