use crate::{
    errors::ServiceError,
    services::orders::PaymentReconciliation,
    services::payments::{self, WebhookEvent},
    AppState,
};
// Aliased so `#[utoipa::path]`'s axum_extras body auto-detection (which
// matches the literal type name `Bytes` and requires `ToSchema`) skips it.
use axum::{body::Bytes as RawBytes, extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde_json::json;
use tracing::{error, info, instrument, warn};

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Payment provider webhook endpoint.
///
/// The signature covers the raw request body, so this handler consumes
/// `Bytes` and never lets a JSON extractor re-serialize the payload first.
/// After the signature checks out, internal reconciliation failures are
/// logged and the event is still acknowledged with 200; the provider retries
/// on anything else and the paid transition is idempotent anyway.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    tag = "webhooks",
    responses(
        (status = 200, description = "Event received"),
        (status = 400, description = "Missing or invalid signature", body = crate::errors::ErrorResponse),
        (status = 500, description = "Webhook secret not configured", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip_all)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: RawBytes,
) -> Result<impl IntoResponse, ServiceError> {
    let secret = state.config.stripe.webhook_secret.as_deref().ok_or_else(|| {
        ServiceError::ConfigError("webhook signing secret is not configured".to_string())
    })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ServiceError::InvalidSignature)?;

    if !payments::verify_webhook_signature(
        signature,
        &body,
        secret,
        state.config.stripe.webhook_tolerance_secs,
    ) {
        warn!("webhook rejected: signature verification failed");
        return Err(ServiceError::InvalidSignature);
    }

    let event = WebhookEvent::parse(&body)?;

    if let Err(e) = reconcile(&state, &event).await {
        error!(
            error = %e,
            event_id = event.id.as_deref().unwrap_or("-"),
            event_type = %event.event_type,
            "webhook reconciliation failed; acknowledging anyway"
        );
    }

    Ok(Json(json!({ "received": true })))
}

async fn reconcile(state: &AppState, event: &WebhookEvent) -> Result<(), ServiceError> {
    match event.event_type.as_str() {
        "checkout.session.completed" | "payment_intent.succeeded" => {
            let Some(intent) = event.payment_intent_id() else {
                warn!(event_type = %event.event_type, "success event carries no payment intent");
                return Ok(());
            };
            let fallback_key = event.metadata("idempotency_key");
            match state.services.orders.mark_paid(intent, fallback_key).await? {
                PaymentReconciliation::Transitioned(order) => {
                    info!(order_id = %order.id, payment_intent_id = %intent, "payment reconciled");
                }
                PaymentReconciliation::AlreadyHandled => {
                    info!(payment_intent_id = %intent, "duplicate delivery; order already paid");
                }
                PaymentReconciliation::NotFound => {
                    warn!(payment_intent_id = %intent, "no order matches this payment");
                }
            }
        }
        "payment_intent.payment_failed" => {
            let Some(intent) = event.payment_intent_id() else {
                warn!("failure event carries no payment intent");
                return Ok(());
            };
            match state.services.orders.mark_failed(intent).await? {
                PaymentReconciliation::Transitioned(order) => {
                    info!(order_id = %order.id, payment_intent_id = %intent, "order marked failed");
                }
                PaymentReconciliation::AlreadyHandled => {
                    info!(payment_intent_id = %intent, "order no longer awaiting payment; failure ignored");
                }
                PaymentReconciliation::NotFound => {
                    warn!(payment_intent_id = %intent, "no order matches this failed payment");
                }
            }
        }
        other => {
            info!(event_type = %other, "ignoring unhandled event type");
        }
    }
    Ok(())
}
