use async_trait::async_trait;
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{order, order_item, order_status_history, Order, OrderItem, OrderStatusHistory},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Order lifecycle states. Parsing is strict (unknown strings are rejected)
/// but transitions are deliberately unrestricted: any state may move to any
/// other, including backwards. The status history records every hop, so an
/// operator override like delivered back to processing stays auditable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(ServiceError::InvalidStatus(format!(
                "Unknown order status: {}",
                other
            ))),
        }
    }
}

/// Payment state mirrored onto the order row. Updated independently of the
/// fulfillment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderPaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl OrderPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPaymentStatus::Pending => "pending",
            OrderPaymentStatus::Completed => "completed",
            OrderPaymentStatus::Failed => "failed",
            OrderPaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for OrderPaymentStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderPaymentStatus::Pending),
            "completed" => Ok(OrderPaymentStatus::Completed),
            "failed" => Ok(OrderPaymentStatus::Failed),
            "refunded" => Ok(OrderPaymentStatus::Refunded),
            other => Err(ServiceError::InvalidStatus(format!(
                "Unknown payment status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub seller_id: Option<Uuid>,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub buyer_id: Uuid,
    pub items: Vec<NewOrderItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
}

/// An order together with its immutable item snapshots.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderDetails {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

impl OrderDetails {
    /// True when the seller has at least one line in this order.
    pub fn has_seller(&self, seller_id: Uuid) -> bool {
        self.items.iter().any(|i| i.seller_id == Some(seller_id))
    }
}

/// Durable order records and their lifecycle.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates the order, its item snapshots and the initial history row in
    /// a single transaction. This is the one commit point of checkout.
    async fn create(&self, new_order: NewOrder) -> Result<OrderDetails, ServiceError>;

    async fn get(&self, order_id: Uuid) -> Result<Option<OrderDetails>, ServiceError>;

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<OrderDetails>, ServiceError>;

    /// Updates the status column and appends the audit row atomically.
    async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        notes: Option<String>,
    ) -> Result<order::Model, ServiceError>;

    /// Updates the mirrored payment status. A `completed` payment
    /// force-advances the order to `processing` regardless of its current
    /// status.
    async fn update_payment_status(
        &self,
        order_id: Uuid,
        payment_status: OrderPaymentStatus,
        payment_intent_id: Option<String>,
    ) -> Result<order::Model, ServiceError>;

    async fn status_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, ServiceError>;

    async fn list_for_buyer(
        &self,
        buyer_id: Uuid,
        page: u64,
        per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<(Vec<OrderDetails>, u64), ServiceError>;

    /// Orders containing at least one line belonging to the seller, with the
    /// item list filtered down to that seller's lines.
    async fn list_for_seller(
        &self,
        seller_id: Uuid,
        page: u64,
        per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<(Vec<OrderDetails>, u64), ServiceError>;
}

/// Generates a unique customer-facing order number.
pub fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Order store backed by the relational order tables.
#[derive(Clone)]
pub struct SqlOrderStore {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl SqlOrderStore {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    async fn items_for(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }
}

#[async_trait]
impl OrderStore for SqlOrderStore {
    #[instrument(skip(self, new_order), fields(buyer_id = %new_order.buyer_id, total = %new_order.total))]
    async fn create(&self, new_order: NewOrder) -> Result<OrderDetails, ServiceError> {
        if new_order.items.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "Order must contain at least one item".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            buyer_id: Set(new_order.buyer_id),
            status: Set(OrderStatus::Pending.as_str().to_string()),
            payment_status: Set(OrderPaymentStatus::Pending.as_str().to_string()),
            payment_intent_id: Set(None),
            subtotal: Set(new_order.subtotal),
            tax: Set(new_order.tax),
            shipping_cost: Set(new_order.shipping_cost),
            total: Set(new_order.total),
            shipping_line1: Set(new_order.shipping_address.line1),
            shipping_line2: Set(new_order.shipping_address.line2),
            shipping_city: Set(new_order.shipping_address.city),
            shipping_state: Set(new_order.shipping_address.state),
            shipping_postal_code: Set(new_order.shipping_address.postal_code),
            shipping_country: Set(new_order.shipping_address.country),
            payment_method: Set(new_order.payment_method),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(new_order.items.len());
        for item in new_order.items {
            let inserted = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                seller_id: Set(item.seller_id),
                product_name: Set(item.product_name),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                subtotal: Set(item.subtotal),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(inserted);
        }

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            old_status: Set(None),
            new_status: Set(OrderStatus::Pending.as_str().to_string()),
            notes: Set(Some("Order created".to_string())),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;

        info!(order_id = %order_id, order_number = %order_model.order_number, "Order created");
        Ok(OrderDetails {
            order: order_model,
            items,
        })
    }

    #[instrument(skip(self))]
    async fn get(&self, order_id: Uuid) -> Result<Option<OrderDetails>, ServiceError> {
        let Some(order) = Order::find_by_id(order_id).one(&*self.db).await? else {
            return Ok(None);
        };
        let items = self.items_for(order_id).await?;
        Ok(Some(OrderDetails { order, items }))
    }

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<OrderDetails>, ServiceError> {
        let Some(order) = Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };
        let items = self.items_for(order.id).await?;
        Ok(Some(OrderDetails { order, items }))
    }

    #[instrument(skip(self, notes), fields(new_status = %new_status))]
    async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        notes: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let now = Utc::now();

        // Status column and audit row move together or not at all; losing
        // atomicity here would desynchronize the cached status from the
        // history.
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let old_status = order.status.clone();

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status.as_str().to_string());
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            old_status: Set(Some(old_status.clone())),
            new_status: Set(new_status.as_str().to_string()),
            notes: Set(notes),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.clone(),
                new_status: new_status.as_str().to_string(),
            })
            .await;

        info!(order_id = %order_id, old_status = %old_status, new_status = %new_status, "Order status updated");
        Ok(updated)
    }

    #[instrument(skip(self, payment_intent_id), fields(payment_status = %payment_status.as_str()))]
    async fn update_payment_status(
        &self,
        order_id: Uuid,
        payment_status: OrderPaymentStatus,
        payment_intent_id: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(payment_status.as_str().to_string());
        if payment_intent_id.is_some() {
            active.payment_intent_id = Set(payment_intent_id);
        }
        active.updated_at = Set(Utc::now());
        let mut updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderPaymentStatusChanged {
                order_id,
                payment_status: payment_status.as_str().to_string(),
            })
            .await;

        if payment_status == OrderPaymentStatus::Completed {
            updated = self
                .update_status(
                    order_id,
                    OrderStatus::Processing,
                    Some("Payment received".to_string()),
                )
                .await?;
        }

        Ok(updated)
    }

    async fn status_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, ServiceError> {
        Ok(OrderStatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    async fn list_for_buyer(
        &self,
        buyer_id: Uuid,
        page: u64,
        per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<(Vec<OrderDetails>, u64), ServiceError> {
        let mut query = Order::find().filter(order::Column::BuyerId.eq(buyer_id));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.as_str()));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut details = Vec::with_capacity(orders.len());
        for order in orders {
            let items = self.items_for(order.id).await?;
            details.push(OrderDetails { order, items });
        }
        Ok((details, total))
    }

    #[instrument(skip(self))]
    async fn list_for_seller(
        &self,
        seller_id: Uuid,
        page: u64,
        per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<(Vec<OrderDetails>, u64), ServiceError> {
        let mut query = Order::find()
            .join(
                sea_orm::JoinType::InnerJoin,
                order::Relation::OrderItems.def(),
            )
            .filter(order_item::Column::SellerId.eq(Some(seller_id)))
            .distinct();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.as_str()));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut details = Vec::with_capacity(orders.len());
        for order in orders {
            let items = self
                .items_for(order.id)
                .await?
                .into_iter()
                .filter(|i| i.seller_id == Some(seller_id))
                .collect();
            details.push(OrderDetails { order, items });
        }
        Ok((details, total))
    }
}
