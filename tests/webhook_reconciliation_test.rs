mod common;

use axum::http::StatusCode;
use common::{seed_variant, spawn_app_with, sign_webhook, TestApp, TEST_WEBHOOK_SECRET};
use mycoshop_api::entities::order;
use mycoshop_api::services::orders::{NewOrder, NewOrderLine, OrderTotals};
use rust_decimal_macros::dec;
use serde_json::json;

async fn webhook_app() -> TestApp {
    spawn_app_with(|cfg| {
        cfg.stripe.webhook_secret = Some(TEST_WEBHOOK_SECRET.to_string());
    })
    .await
}

/// Creates a pending order directly through the order service, optionally
/// recording a payment-intent id the way checkout does after session
/// creation.
async fn create_pending_order(app: &TestApp, key: &str, intent: Option<&str>) -> order::Model {
    let variant = seed_variant(&app.state, &format!("SKU-{}", key), dec!(20.00), 50).await;

    let order = app
        .state
        .services
        .orders
        .insert_pending_order(
            &*app.state.db,
            NewOrder {
                customer_id: None,
                currency: "usd".to_string(),
                totals: OrderTotals::from_subtotal(dec!(20.00)),
                payment_provider: "stripe".to_string(),
                idempotency_key: Some(key.to_string()),
                lines: vec![NewOrderLine {
                    variant_id: variant.id,
                    sku: variant.sku.clone(),
                    name: variant.name.clone(),
                    quantity: 1,
                    unit_price: variant.price,
                }],
            },
        )
        .await
        .expect("failed to create order");

    if let Some(intent) = intent {
        app.state
            .services
            .orders
            .record_payment_intent(order.id, intent, "requires_payment")
            .await
            .expect("failed to record intent");
    }

    order
}

async fn post_webhook(app: &TestApp, payload: &[u8], header: &str) -> (StatusCode, serde_json::Value) {
    app.request_raw(
        "POST",
        "/api/v1/webhooks/stripe",
        &[
            ("Stripe-Signature", header),
            ("content-type", "application/json"),
        ],
        payload.to_vec(),
    )
    .await
}

async fn fetch_order(app: &TestApp, id: uuid::Uuid) -> order::Model {
    app.state
        .services
        .orders
        .find_by_id(id)
        .await
        .unwrap()
        .expect("order should exist")
}

#[tokio::test]
async fn valid_success_event_marks_order_paid() {
    let app = webhook_app().await;
    let order = create_pending_order(&app, "wh-1", Some("pi_100")).await;

    let payload = json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": "pi_100"}}
    })
    .to_string();
    let header = sign_webhook(payload.as_bytes(), TEST_WEBHOOK_SECRET);

    let (status, body) = post_webhook(&app, payload.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);

    let updated = fetch_order(&app, order.id).await;
    assert_eq!(updated.status, "paid");
    assert_eq!(updated.payment_status, "succeeded");
    assert_eq!(updated.payment_intent_id.as_deref(), Some("pi_100"));
}

#[tokio::test]
async fn replayed_event_transitions_exactly_once() {
    let app = webhook_app().await;
    let order = create_pending_order(&app, "wh-replay", Some("pi_200")).await;

    let payload = json!({
        "id": "evt_2",
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": "pi_200"}}
    })
    .to_string();
    let header = sign_webhook(payload.as_bytes(), TEST_WEBHOOK_SECRET);

    let (status, _) = post_webhook(&app, payload.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_webhook(&app, payload.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::OK);

    let updated = fetch_order(&app, order.id).await;
    assert_eq!(updated.status, "paid");
    // The conditional update applied once: one version bump, not two.
    assert_eq!(updated.version, order.version + 1);
}

#[tokio::test]
async fn invalid_signature_is_rejected_without_side_effects() {
    let app = webhook_app().await;
    let order = create_pending_order(&app, "wh-bad-sig", Some("pi_300")).await;

    let payload = json!({
        "id": "evt_3",
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": "pi_300"}}
    })
    .to_string();

    // Signed with the wrong secret
    let header = sign_webhook(payload.as_bytes(), "whsec_wrong");
    let (status, body) = post_webhook(&app, payload.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SIGNATURE");

    // Missing header entirely
    let (status, _) = app
        .request_raw(
            "POST",
            "/api/v1/webhooks/stripe",
            &[("content-type", "application/json")],
            payload.clone().into_bytes(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let updated = fetch_order(&app, order.id).await;
    assert_eq!(updated.status, "pending_payment");
}

#[tokio::test]
async fn tampered_payload_fails_verification() {
    let app = webhook_app().await;
    create_pending_order(&app, "wh-tamper", Some("pi_350")).await;

    let payload = json!({
        "id": "evt_4",
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": "pi_350"}}
    })
    .to_string();
    let header = sign_webhook(payload.as_bytes(), TEST_WEBHOOK_SECRET);

    let tampered = payload.replace("pi_350", "pi_999");
    let (status, _) = post_webhook(&app, tampered.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_completed_matches_order_by_metadata_fallback() {
    let app = webhook_app().await;
    // No payment intent was recorded; only the metadata can identify the order.
    let order = create_pending_order(&app, "wh-fallback", None).await;

    let payload = json!({
        "id": "evt_5",
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_500",
            "payment_intent": "pi_500",
            "metadata": {"order_id": order.id, "idempotency_key": "wh-fallback"}
        }}
    })
    .to_string();
    let header = sign_webhook(payload.as_bytes(), TEST_WEBHOOK_SECRET);

    let (status, _) = post_webhook(&app, payload.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::OK);

    let updated = fetch_order(&app, order.id).await;
    assert_eq!(updated.status, "paid");
    // The intent id learned from the event is recorded during the transition.
    assert_eq!(updated.payment_intent_id.as_deref(), Some("pi_500"));
}

#[tokio::test]
async fn payment_failure_marks_pending_order_failed() {
    let app = webhook_app().await;
    let order = create_pending_order(&app, "wh-fail", Some("pi_600")).await;

    let payload = json!({
        "id": "evt_6",
        "type": "payment_intent.payment_failed",
        "data": {"object": {"id": "pi_600"}}
    })
    .to_string();
    let header = sign_webhook(payload.as_bytes(), TEST_WEBHOOK_SECRET);

    let (status, _) = post_webhook(&app, payload.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::OK);

    let updated = fetch_order(&app, order.id).await;
    assert_eq!(updated.status, "failed");
    assert_eq!(updated.payment_status, "failed");
}

#[tokio::test]
async fn failure_event_never_regresses_a_paid_order() {
    let app = webhook_app().await;
    let order = create_pending_order(&app, "wh-regress", Some("pi_700")).await;

    let success = json!({
        "id": "evt_7a",
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": "pi_700"}}
    })
    .to_string();
    let header = sign_webhook(success.as_bytes(), TEST_WEBHOOK_SECRET);
    let (status, _) = post_webhook(&app, success.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::OK);

    let failure = json!({
        "id": "evt_7b",
        "type": "payment_intent.payment_failed",
        "data": {"object": {"id": "pi_700"}}
    })
    .to_string();
    let header = sign_webhook(failure.as_bytes(), TEST_WEBHOOK_SECRET);
    let (status, _) = post_webhook(&app, failure.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::OK);

    let updated = fetch_order(&app, order.id).await;
    assert_eq!(updated.status, "paid");
}

#[tokio::test]
async fn unknown_event_types_and_unmatched_intents_are_acknowledged() {
    let app = webhook_app().await;

    let payload = json!({
        "id": "evt_8",
        "type": "customer.created",
        "data": {"object": {"id": "cus_1"}}
    })
    .to_string();
    let header = sign_webhook(payload.as_bytes(), TEST_WEBHOOK_SECRET);
    let (status, body) = post_webhook(&app, payload.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);

    // A success event for an intent no order knows about is still acked; the
    // provider must not keep retrying something this service cannot resolve.
    let payload = json!({
        "id": "evt_9",
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": "pi_unknown"}}
    })
    .to_string();
    let header = sign_webhook(payload.as_bytes(), TEST_WEBHOOK_SECRET);
    let (status, _) = post_webhook(&app, payload.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_webhook_secret_is_a_config_error() {
    let app = spawn_app_with(|_| {}).await;

    let payload = json!({
        "id": "evt_10",
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": "pi_800"}}
    })
    .to_string();
    let header = sign_webhook(payload.as_bytes(), TEST_WEBHOOK_SECRET);

    let (status, body) = post_webhook(&app, payload.as_bytes(), &header).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "CONFIG_ERROR");
}
