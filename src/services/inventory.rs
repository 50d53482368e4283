use crate::{
    db::DbPool,
    entities::product_variant::{self, Entity as ProductVariantEntity},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Stock queries and reservation. The reservation primitive is a single
/// conditional UPDATE executed by the storage engine, never an application
/// read-modify-write: concurrent checkouts racing for the same variant
/// serialize on the row, and the sum of successful decrements can never
/// exceed the starting stock.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Attempts to reserve `quantity` units of a variant on the given
    /// connection (normally the checkout transaction). Returns false when the
    /// remaining stock is insufficient; the row is left untouched in that
    /// case.
    pub async fn reserve_stock<C: ConnectionTrait>(
        conn: &C,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let result = ProductVariantEntity::update_many()
            .col_expr(
                product_variant::Column::StockQuantity,
                Expr::col(product_variant::Column::StockQuantity).sub(quantity),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_variant::Column::Id.eq(variant_id))
            .filter(product_variant::Column::StockQuantity.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(%variant_id, quantity, "stock reservation refused");
            return Ok(false);
        }

        Ok(true)
    }

    /// Current stock count for a SKU, if the variant exists.
    #[instrument(skip(self))]
    pub async fn stock_for_sku(&self, sku: &str) -> Result<Option<i32>, ServiceError> {
        let variant = ProductVariantEntity::find()
            .filter(product_variant::Column::Sku.eq(sku))
            .one(&*self.db_pool)
            .await?;

        Ok(variant.map(|v| v.stock_quantity))
    }

    /// Resolves the requested SKUs against active variants. Order of the
    /// result matches the request; any unknown or inactive SKU fails the
    /// whole resolution before stock is touched.
    pub async fn resolve_active_variants<C: ConnectionTrait>(
        conn: &C,
        skus: &[String],
    ) -> Result<Vec<product_variant::Model>, ServiceError> {
        let found = ProductVariantEntity::find()
            .filter(product_variant::Column::Sku.is_in(skus.iter().cloned()))
            .filter(product_variant::Column::Active.eq(true))
            .all(conn)
            .await?;

        skus.iter()
            .map(|sku| {
                found
                    .iter()
                    .find(|v| &v.sku == sku)
                    .cloned()
                    .ok_or_else(|| ServiceError::SkuNotFound(sku.clone()))
            })
            .collect()
    }
}
