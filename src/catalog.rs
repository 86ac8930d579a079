use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{product, Product},
    errors::ServiceError,
};

pub use crate::entities::product::ProductStatus;

/// Read view of a catalog product at a point in time. Checkout always
/// re-fetches this instead of trusting whatever the cart cached: price and
/// stock drift between add-to-cart and checkout is the normal case, not the
/// exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    pub status: ProductStatus,
    pub seller_id: Option<Uuid>,
}

impl ProductSnapshot {
    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

/// Catalog collaborator consumed by the cart store and checkout
/// orchestrator.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Current snapshot for a product, or `None` if it does not exist.
    async fn get_product(&self, id: Uuid) -> Result<Option<ProductSnapshot>, ServiceError>;

    /// Atomically adjusts stock by `delta` (negative to decrement). Negative
    /// deltas are floor-checked in the same statement; a decrement below
    /// zero is rejected with `InsufficientStock` rather than applied.
    async fn adjust_stock(&self, id: Uuid, delta: i32) -> Result<(), ServiceError>;
}

/// Catalog access backed by the relational products table.
#[derive(Clone)]
pub struct SqlCatalog {
    db: Arc<DatabaseConnection>,
}

impl SqlCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogClient for SqlCatalog {
    #[instrument(skip(self))]
    async fn get_product(&self, id: Uuid) -> Result<Option<ProductSnapshot>, ServiceError> {
        let product = Product::find_by_id(id).one(&*self.db).await?;

        Ok(product.map(|p| ProductSnapshot {
            id: p.id,
            name: p.name,
            price: p.price,
            stock: p.stock,
            status: p.status,
            seller_id: p.seller_id,
        }))
    }

    #[instrument(skip(self))]
    async fn adjust_stock(&self, id: Uuid, delta: i32) -> Result<(), ServiceError> {
        // stock = stock + delta in a single statement; for decrements the
        // WHERE clause enforces the floor so concurrent checkouts cannot
        // drive stock negative (lost updates stay impossible even though the
        // validate-then-decrement gap itself is not locked).
        let mut update = Product::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(delta),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(id));

        if delta < 0 {
            update = update.filter(product::Column::Stock.gte(-delta));
        }

        let result = update.exec(&*self.db).await?;

        if result.rows_affected == 0 {
            // Distinguish a missing product from a floor-check rejection.
            let exists = Product::find_by_id(id).one(&*self.db).await?.is_some();
            if exists {
                return Err(ServiceError::InsufficientStock(format!(
                    "Stock adjustment of {} rejected for product {}",
                    delta, id
                )));
            }
            return Err(ServiceError::NotFound(format!("Product {} not found", id)));
        }

        info!(product_id = %id, delta, "Stock adjusted");
        Ok(())
    }
}
