use crate::{
    entities::{order, order_item},
    errors::ServiceError,
    handlers::common,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    #[schema(example = "MYC-3F2A9B41C07D")]
    pub order_number: String,
    #[schema(example = "pending_payment")]
    pub status: String,
    #[schema(example = "usd")]
    pub currency: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub shipping_total: Decimal,
    pub tax_total: Decimal,
    pub total_amount: Decimal,
    #[schema(example = "requires_payment")]
    pub payment_status: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    #[schema(example = "LC-100-DRY")]
    pub sku: String,
    #[schema(example = "Dried Lion's Mane 100g")]
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl OrderResponse {
    pub fn from_parts(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            status: order.status,
            currency: order.currency,
            subtotal: order.subtotal,
            discount_total: order.discount_total,
            shipping_total: order.shipping_total,
            tax_total: order.tax_total,
            total_amount: order.total_amount,
            payment_status: order.payment_status,
            created_at: order.created_at,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    sku: item.sku,
                    name: item.name,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    total_price: item.total_price,
                })
                .collect(),
        }
    }
}

/// Order confirmation view: the order and its line items.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "No such order", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order, items) = state
        .services
        .orders
        .find_with_items(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", id)))?;

    Ok(common::success_response(OrderResponse::from_parts(
        order, items,
    )))
}
