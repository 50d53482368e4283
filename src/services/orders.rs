use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    Set, SqlErr,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Order totals. The grand total is always derived here, server-side, from
/// the captured line prices; a client-supplied total is never trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub shipping_total: Decimal,
    pub tax_total: Decimal,
}

impl OrderTotals {
    pub fn from_subtotal(subtotal: Decimal) -> Self {
        Self {
            subtotal,
            discount_total: Decimal::ZERO,
            shipping_total: Decimal::ZERO,
            tax_total: Decimal::ZERO,
        }
    }

    pub fn grand_total(&self) -> Decimal {
        self.subtotal - self.discount_total + self.shipping_total + self.tax_total
    }
}

/// Input for creating a pending order inside the checkout transaction.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: Option<Uuid>,
    pub currency: String,
    pub totals: OrderTotals,
    pub payment_provider: String,
    pub idempotency_key: Option<String>,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub variant_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Outcome of a webhook-driven payment reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentReconciliation {
    /// The order transitioned as a result of this event.
    Transitioned(order::Model),
    /// The order was already in a terminal state; duplicate delivery, no-op.
    AlreadyHandled,
    /// No order matches the payment reference; the event may be unrelated or
    /// early. Safe to ignore.
    NotFound,
}

/// Persistence and state transitions for orders. Status never regresses from
/// `paid`; the paid transition is a single conditional UPDATE so duplicate
/// webhook deliveries racing each other apply exactly once.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<EventSender>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Inserts a `pending_payment` order with its items on the given
    /// connection (the checkout transaction). A unique-index conflict on the
    /// idempotency key means another process already created this order.
    pub async fn insert_pending_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        new_order: NewOrder,
    ) -> Result<order::Model, ServiceError> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = generate_order_number();

        let active = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            customer_id: Set(new_order.customer_id),
            status: Set(OrderStatus::PendingPayment.as_str().to_string()),
            currency: Set(new_order.currency),
            subtotal: Set(new_order.totals.subtotal),
            discount_total: Set(new_order.totals.discount_total),
            shipping_total: Set(new_order.totals.shipping_total),
            tax_total: Set(new_order.totals.tax_total),
            total_amount: Set(new_order.totals.grand_total()),
            payment_provider: Set(new_order.payment_provider),
            payment_intent_id: Set(None),
            payment_status: Set("requires_payment".to_string()),
            idempotency_key: Set(new_order.idempotency_key),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };

        let model = active.insert(conn).await.map_err(|e| {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                ServiceError::DuplicateRequest(
                    "an order for this idempotency key already exists".to_string(),
                )
            } else {
                error!(error = %e, %order_id, "failed to insert order");
                ServiceError::DatabaseError(e)
            }
        })?;

        let items: Vec<order_item::ActiveModel> = new_order
            .lines
            .into_iter()
            .map(|line| order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                variant_id: Set(line.variant_id),
                sku: Set(line.sku),
                name: Set(line.name),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(line.unit_price * Decimal::from(line.quantity)),
            })
            .collect();

        OrderItemEntity::insert_many(items).exec(conn).await?;

        Ok(model)
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db_pool).await?)
    }

    /// Order plus its line items, for the confirmation view.
    #[instrument(skip(self))]
    pub async fn find_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<Option<(order::Model, Vec<order_item::Model>)>, ServiceError> {
        let Some(order) = self.find_by_id(order_id).await? else {
            return Ok(None);
        };

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db_pool)
            .await?;

        Ok(Some((order, items)))
    }

    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::IdempotencyKey.eq(key))
            .one(&*self.db_pool)
            .await?)
    }

    pub async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db_pool)
            .await?)
    }

    /// Records the provider's payment-intent id on a freshly created order.
    /// Best-effort: the webhook path can still match by metadata, so a
    /// failure here is logged by the caller rather than failing checkout.
    pub async fn record_payment_intent(
        &self,
        order_id: Uuid,
        payment_intent_id: &str,
        provider_status: &str,
    ) -> Result<(), ServiceError> {
        OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentIntentId,
                Expr::value(payment_intent_id),
            )
            .col_expr(order::Column::PaymentStatus, Expr::value(provider_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db_pool)
            .await?;
        Ok(())
    }

    /// Transitions the matching order to `paid`, exactly once.
    ///
    /// The order is located by payment-intent id, falling back to the
    /// idempotency key carried in the provider's metadata (covers events that
    /// arrive before the intent id was recorded). The transition itself is a
    /// conditional UPDATE filtered on the current status, so a concurrent
    /// duplicate delivery finds zero rows to update.
    #[instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        payment_intent_id: &str,
        fallback_idempotency_key: Option<&str>,
    ) -> Result<PaymentReconciliation, ServiceError> {
        let order = match self.find_by_payment_intent(payment_intent_id).await? {
            Some(order) => order,
            None => match fallback_idempotency_key {
                Some(key) => match self.find_by_idempotency_key(key).await? {
                    Some(order) => {
                        warn!(
                            %payment_intent_id,
                            idempotency_key = %key,
                            order_id = %order.id,
                            "matched order by idempotency key fallback"
                        );
                        order
                    }
                    None => return Ok(PaymentReconciliation::NotFound),
                },
                None => return Ok(PaymentReconciliation::NotFound),
            },
        };

        if order.status == OrderStatus::Paid.as_str() {
            return Ok(PaymentReconciliation::AlreadyHandled);
        }

        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Paid.as_str()),
            )
            .col_expr(order::Column::PaymentStatus, Expr::value("succeeded"))
            .col_expr(
                order::Column::PaymentIntentId,
                Expr::value(payment_intent_id),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.ne(OrderStatus::Paid.as_str()))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            // Lost the race against a duplicate delivery.
            return Ok(PaymentReconciliation::AlreadyHandled);
        }

        info!(order_id = %order.id, %payment_intent_id, "order marked paid");

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender
                .send(Event::OrderPaid {
                    order_id: order.id,
                    payment_intent_id: payment_intent_id.to_string(),
                })
                .await
            {
                warn!(error = %e, order_id = %order.id, "failed to send order paid event");
            }
        }

        let updated = self
            .find_by_id(order.id)
            .await?
            .ok_or_else(|| ServiceError::InternalError("order vanished after update".into()))?;

        Ok(PaymentReconciliation::Transitioned(updated))
    }

    /// Marks an order failed on a provider failure event. Only applies while
    /// the order is still awaiting payment; a paid or canceled order is left
    /// alone.
    #[instrument(skip(self))]
    pub async fn mark_failed(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentReconciliation, ServiceError> {
        let Some(order) = self.find_by_payment_intent(payment_intent_id).await? else {
            return Ok(PaymentReconciliation::NotFound);
        };

        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Failed.as_str()),
            )
            .col_expr(order::Column::PaymentStatus, Expr::value("failed"))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order.id))
            .filter(
                order::Column::Status.eq(OrderStatus::PendingPayment.as_str()),
            )
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            return Ok(PaymentReconciliation::AlreadyHandled);
        }

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender
                .send(Event::OrderPaymentFailed { order_id: order.id })
                .await
            {
                warn!(error = %e, order_id = %order.id, "failed to send payment failed event");
            }
        }

        let updated = self
            .find_by_id(order.id)
            .await?
            .ok_or_else(|| ServiceError::InternalError("order vanished after update".into()))?;

        Ok(PaymentReconciliation::Transitioned(updated))
    }
}

fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("MYC-{}", &suffix[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn grand_total_formula() {
        let totals = OrderTotals {
            subtotal: dec!(150000),
            discount_total: dec!(10000),
            shipping_total: dec!(9000),
            tax_total: dec!(16500),
        };
        assert_eq!(totals.grand_total(), dec!(165500));
    }

    #[test]
    fn from_subtotal_zeroes_adjustments() {
        let totals = OrderTotals::from_subtotal(dec!(150000));
        assert_eq!(totals.grand_total(), dec!(150000));
    }

    #[test]
    fn order_numbers_are_prefixed_and_distinct() {
        let a = generate_order_number();
        let b = generate_order_number();
        assert!(a.starts_with("MYC-"));
        assert_eq!(a.len(), "MYC-".len() + 12);
        assert_ne!(a, b);
    }

    proptest! {
        // grand = sub - discount + shipping + tax, for any plausible amounts
        #[test]
        fn grand_total_always_matches_formula(
            sub in 0u64..10_000_000,
            disc in 0u64..100_000,
            ship in 0u64..100_000,
            tax in 0u64..1_000_000,
        ) {
            let totals = OrderTotals {
                subtotal: Decimal::from(sub),
                discount_total: Decimal::from(disc),
                shipping_total: Decimal::from(ship),
                tax_total: Decimal::from(tax),
            };
            let expected = Decimal::from(sub) - Decimal::from(disc)
                + Decimal::from(ship) + Decimal::from(tax);
            prop_assert_eq!(totals.grand_total(), expected);
        }
    }
}
