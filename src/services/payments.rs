use crate::{config::AppConfig, errors::ServiceError};
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{error, instrument};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const PROVIDER_NAME: &str = "stripe";

/// One line of a provider checkout session, amounts in minor currency units.
#[derive(Debug, Clone)]
pub struct SessionLineItem {
    pub name: String,
    pub unit_amount_minor: i64,
    pub quantity: i64,
}

impl SessionLineItem {
    /// Converts a decimal price into minor units (two decimal places).
    pub fn new(name: String, unit_price: Decimal, quantity: i32) -> Result<Self, ServiceError> {
        let unit_amount_minor = (unit_price * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| {
                ServiceError::InternalError(format!("price out of range: {}", unit_price))
            })?;
        Ok(Self {
            name,
            unit_amount_minor,
            quantity: i64::from(quantity),
        })
    }
}

/// A created provider checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Redirect URL the storefront sends the customer to.
    pub url: Option<String>,
    /// Present once the provider has attached a charge attempt.
    pub payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: Option<String>,
}

/// Thin client for the payment provider's checkout-session API. Network
/// failures surface as `PaymentProvider` errors; the caller decides whether
/// they are fatal for the request.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
    currency: String,
    success_url: String,
    cancel_url: String,
}

impl StripeClient {
    /// Builds a client when a secret key is configured; None otherwise.
    /// Checkout reports CONFIG_ERROR when called without a client.
    pub fn from_config(cfg: &AppConfig) -> Option<Self> {
        let secret_key = cfg.stripe.secret_key.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            secret_key,
            api_base: cfg.stripe.api_base.clone(),
            currency: cfg.currency.clone(),
            success_url: cfg.stripe.success_url.clone(),
            cancel_url: cfg.stripe.cancel_url.clone(),
        })
    }

    /// Creates a hosted checkout session, tagging it with the order id and
    /// idempotency key so webhook events can always be correlated back.
    #[instrument(skip(self, line_items), fields(order_id = %order_id))]
    pub async fn create_checkout_session(
        &self,
        order_id: Uuid,
        idempotency_key: &str,
        line_items: &[SessionLineItem],
    ) -> Result<CheckoutSession, ServiceError> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), self.success_url.clone()),
            ("cancel_url".into(), self.cancel_url.clone()),
            ("metadata[order_id]".into(), order_id.to_string()),
            (
                "metadata[idempotency_key]".into(),
                idempotency_key.to_string(),
            ),
        ];

        for (i, item) in line_items.iter().enumerate() {
            params.push((
                format!("line_items[{}][price_data][currency]", i),
                self.currency.clone(),
            ));
            params.push((
                format!("line_items[{}][price_data][unit_amount]", i),
                item.unit_amount_minor.to_string(),
            ));
            params.push((
                format!("line_items[{}][price_data][product_data][name]", i),
                item.name.clone(),
            ));
            params.push((
                format!("line_items[{}][quantity]", i),
                item.quantity.to_string(),
            ));
        }

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "checkout session request failed");
                ServiceError::PaymentProvider(format!("provider unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<ProviderErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| "no error detail".to_string());
            error!(%status, %message, "checkout session rejected by provider");
            return Err(ServiceError::PaymentProvider(format!(
                "provider returned {}: {}",
                status, message
            )));
        }

        let session = response.json::<CheckoutSession>().await.map_err(|e| {
            ServiceError::PaymentProvider(format!("malformed provider response: {}", e))
        })?;

        Ok(session)
    }
}

/// A signed webhook event, parsed after signature verification.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, ServiceError> {
        serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(format!("invalid event payload: {}", e)))
    }

    /// The payment-intent id this event refers to, by event type.
    pub fn payment_intent_id(&self) -> Option<&str> {
        match self.event_type.as_str() {
            // The session object references the intent; the intent events are
            // about the intent object itself.
            "checkout.session.completed" => self.data.object.get("payment_intent")?.as_str(),
            "payment_intent.succeeded" | "payment_intent.payment_failed" => {
                self.data.object.get("id")?.as_str()
            }
            _ => None,
        }
    }

    /// Metadata value set at session creation (e.g. the idempotency key used
    /// for fallback order matching).
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.data.object.get("metadata")?.get(key)?.as_str()
    }
}

/// Verifies a `Stripe-Signature` header (`t=...,v1=...`) against the raw,
/// unparsed request body. Any re-serialization upstream breaks this, which is
/// why the webhook handler consumes bytes ahead of any JSON extractor.
pub fn verify_webhook_signature(
    signature_header: &str,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let mut timestamp = "";
    let mut signature = "";
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value,
            Some(("v1", value)) => signature = value,
            _ => {}
        }
    }
    if timestamp.is_empty() || signature.is_empty() {
        return false;
    }

    // Reject stale (possibly replayed) events.
    match timestamp.parse::<i64>() {
        Ok(ts) => {
            let now = chrono::Utc::now().timestamp();
            if (now - ts).unsigned_abs() > tolerance_secs {
                return false;
            }
        }
        Err(_) => return false,
    }

    let expected = compute_signature(timestamp, payload, secret);
    constant_time_eq(&expected, signature)
}

/// HMAC-SHA256 over `"{timestamp}.{payload}"`, hex-encoded.
pub fn compute_signature(timestamp: &str, payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signed_header(payload: &[u8], secret: &str) -> String {
        let ts = chrono::Utc::now().timestamp().to_string();
        let sig = compute_signature(&ts, payload, secret);
        format!("t={},v1={}", ts, sig)
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = signed_header(payload, "whsec_test");
        assert!(verify_webhook_signature(&header, payload, "whsec_test", 300));
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = signed_header(payload, "whsec_test");
        assert!(!verify_webhook_signature(&header, payload, "whsec_other", 300));
    }

    #[test]
    fn rejects_tampered_payload() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = signed_header(payload, "whsec_test");
        let tampered = br#"{"type":"payment_intent.succeeded","amount":1}"#;
        assert!(!verify_webhook_signature(&header, tampered, "whsec_test", 300));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = b"{}";
        let ts = (chrono::Utc::now().timestamp() - 3600).to_string();
        let sig = compute_signature(&ts, payload, "whsec_test");
        let header = format!("t={},v1={}", ts, sig);
        assert!(!verify_webhook_signature(&header, payload, "whsec_test", 300));
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(!verify_webhook_signature("garbage", b"{}", "whsec_test", 300));
        assert!(!verify_webhook_signature("t=,v1=", b"{}", "whsec_test", 300));
    }

    #[test]
    fn extracts_intent_from_session_completed() {
        let payload = br#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_123",
                "payment_intent": "pi_456",
                "metadata": {"order_id": "o", "idempotency_key": "k-1"}
            }}
        }"#;
        let event = WebhookEvent::parse(payload).unwrap();
        assert_eq!(event.payment_intent_id(), Some("pi_456"));
        assert_eq!(event.metadata("idempotency_key"), Some("k-1"));
    }

    #[test]
    fn extracts_intent_from_intent_succeeded() {
        let payload = br#"{
            "id": "evt_2",
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_456"}}
        }"#;
        let event = WebhookEvent::parse(payload).unwrap();
        assert_eq!(event.payment_intent_id(), Some("pi_456"));
    }

    #[test]
    fn unknown_event_type_has_no_intent() {
        let payload = br#"{
            "id": "evt_3",
            "type": "customer.created",
            "data": {"object": {"id": "cus_1"}}
        }"#;
        let event = WebhookEvent::parse(payload).unwrap();
        assert_eq!(event.payment_intent_id(), None);
    }

    #[test]
    fn minor_unit_conversion_rounds() {
        let item = SessionLineItem::new("Dried Lion's Mane 100g".into(), dec!(12.345), 2).unwrap();
        assert_eq!(item.unit_amount_minor, 1234); // banker's rounding on .5 below
        let item = SessionLineItem::new("x".into(), dec!(500), 1).unwrap();
        assert_eq!(item.unit_amount_minor, 50000);
    }
}
