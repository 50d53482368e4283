use crate::{
    db::DbPool,
    errors::ServiceError,
    events::{Event, EventSender},
    idempotency::IdempotencyGuard,
    services::inventory::InventoryService,
    services::orders::{NewOrder, NewOrderLine, OrderService, OrderTotals},
    services::payments::{self, SessionLineItem, StripeClient},
};
use rust_decimal::Decimal;
use sea_orm::TransactionTrait;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One requested cart line. Note there is no price field: prices are always
/// re-read server-side at checkout time.
#[derive(Debug, Clone)]
pub struct CheckoutLineInput {
    pub sku: String,
    pub quantity: i32,
}

/// Successful checkout: a durable pending order plus the provider session the
/// customer is redirected to.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order_id: Uuid,
    pub order_number: String,
    pub session_id: String,
    pub checkout_url: String,
}

/// Turns a cart into a pending order and a provider checkout session while
/// guaranteeing no overselling.
///
/// All stock decrements for one checkout plus the order insert are a single
/// transaction: either every line is reserved or none is. The provider call
/// happens outside the transaction; if it fails, the order and its
/// reservation deliberately persist (see DESIGN notes on stale-reservation
/// release).
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    stripe: Option<Arc<StripeClient>>,
    idempotency: Arc<IdempotencyGuard>,
    event_sender: EventSender,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DbPool>,
        orders: Arc<OrderService>,
        stripe: Option<Arc<StripeClient>>,
        idempotency: Arc<IdempotencyGuard>,
        event_sender: EventSender,
        currency: String,
    ) -> Self {
        Self {
            db,
            orders,
            stripe,
            idempotency,
            event_sender,
            currency,
        }
    }

    #[instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn create_checkout(
        &self,
        customer_id: Option<Uuid>,
        items: Vec<CheckoutLineInput>,
        idempotency_key: Option<String>,
    ) -> Result<CheckoutOutcome, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "checkout requires at least one item".to_string(),
            ));
        }
        for line in &items {
            if line.quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "quantity for SKU {} must be at least 1",
                    line.sku
                )));
            }
        }

        // A reused key means the client already has an order; never create a
        // second one. The in-process claim is the fast path, the unique index
        // on orders.idempotency_key is the durable one.
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self.orders.find_by_idempotency_key(key).await? {
                return Err(ServiceError::DuplicateRequest(format!(
                    "order {} was already created with this idempotency key",
                    existing.order_number
                )));
            }
        }

        let claim = self.idempotency.claim(idempotency_key.as_deref());
        if !claim.accepted {
            return Err(ServiceError::DuplicateRequest(
                "a checkout with this idempotency key is already in flight".to_string(),
            ));
        }
        let key = claim.key;

        let order = match self.reserve_and_create(customer_id, &items, &key).await {
            Ok(order) => order,
            Err(e) => {
                // Nothing durable was created; let the client retry with the
                // same key.
                self.idempotency.release(&key);
                return Err(e);
            }
        };

        if let Err(e) = self
            .event_sender
            .send(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
            })
            .await
        {
            warn!(error = %e, order_id = %order.id, "failed to send order created event");
        }

        // From here on the order exists; provider failures are surfaced but
        // never roll the order back.
        let stripe = self.stripe.as_ref().ok_or_else(|| {
            ServiceError::ConfigError("payment provider credentials are not configured".into())
        })?;

        let session_lines = order
            .lines
            .iter()
            .map(|line| SessionLineItem::new(line.name.clone(), line.unit_price, line.quantity))
            .collect::<Result<Vec<_>, _>>()?;

        let session = stripe
            .create_checkout_session(order.id, &key, &session_lines)
            .await
            .map_err(|e| {
                warn!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    error = %e,
                    "provider session creation failed; order remains pending_payment"
                );
                e
            })?;

        // Best-effort write-back; the webhook path can still match the order
        // by metadata if this is lost.
        if let Some(intent) = session.payment_intent.as_deref() {
            if let Err(e) = self
                .orders
                .record_payment_intent(order.id, intent, "requires_payment")
                .await
            {
                warn!(error = %e, order_id = %order.id, "failed to record payment intent id");
            }
        }

        let checkout_url = session.url.clone().ok_or_else(|| {
            ServiceError::PaymentProvider("provider session has no redirect URL".to_string())
        })?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            session_id = %session.id,
            "checkout session created"
        );

        Ok(CheckoutOutcome {
            order_id: order.id,
            order_number: order.order_number,
            session_id: session.id,
            checkout_url,
        })
    }

    /// The transactional half: resolve prices, reserve every line or none,
    /// insert the pending order.
    async fn reserve_and_create(
        &self,
        customer_id: Option<Uuid>,
        items: &[CheckoutLineInput],
        idempotency_key: &str,
    ) -> Result<CreatedOrder, ServiceError> {
        let skus: Vec<String> = items.iter().map(|line| line.sku.clone()).collect();
        let variants = InventoryService::resolve_active_variants(&*self.db, &skus).await?;

        let lines: Vec<NewOrderLine> = variants
            .iter()
            .zip(items)
            .map(|(variant, line)| NewOrderLine {
                variant_id: variant.id,
                sku: variant.sku.clone(),
                name: variant.name.clone(),
                quantity: line.quantity,
                unit_price: variant.price,
            })
            .collect();

        let subtotal: Decimal = lines
            .iter()
            .map(|line| line.unit_price * Decimal::from(line.quantity))
            .sum();

        let txn = self.db.begin().await?;

        for line in &lines {
            let reserved =
                InventoryService::reserve_stock(&txn, line.variant_id, line.quantity).await?;
            if !reserved {
                txn.rollback().await?;
                return Err(ServiceError::OutOfStock(line.sku.clone()));
            }
        }

        let order = self
            .orders
            .insert_pending_order(
                &txn,
                NewOrder {
                    customer_id,
                    currency: self.currency.clone(),
                    totals: OrderTotals::from_subtotal(subtotal),
                    payment_provider: payments::PROVIDER_NAME.to_string(),
                    idempotency_key: Some(idempotency_key.to_string()),
                    lines: lines.clone(),
                },
            )
            .await?;

        txn.commit().await?;

        for line in &lines {
            if let Err(e) = self
                .event_sender
                .send(Event::InventoryReserved {
                    variant_id: line.variant_id,
                    quantity: line.quantity,
                    order_id: order.id,
                })
                .await
            {
                warn!(error = %e, order_id = %order.id, "failed to send reservation event");
            }
        }

        Ok(CreatedOrder {
            id: order.id,
            order_number: order.order_number,
            lines,
        })
    }
}

struct CreatedOrder {
    id: Uuid,
    order_number: String,
    lines: Vec<NewOrderLine>,
}
