//! Shared in-memory test doubles for the checkout flow tests.
//!
//! The fakes implement the store traits with the same observable semantics
//! as the SQL-backed implementations, so orchestration behavior can be
//! asserted without a database or cache environment.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;
use uuid::Uuid;

use cloudretail_api::{
    auth::{AuthUser, Role},
    cart::{CartBackend, CartService, MemoryCartBackend},
    catalog::{CatalogClient, ProductSnapshot, ProductStatus},
    config::AppConfig,
    entities::{
        order, order_item, order_status_history, payment_refund, payment_transaction,
        payment_transaction::PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        checkout::CheckoutService,
        orders::{
            generate_order_number, NewOrder, OrderDetails, OrderPaymentStatus, OrderStatus,
            OrderStore, ShippingAddress,
        },
        payment_provider::{
            ConfirmOutcome, ConfirmStatus, PaymentMethodDetails, PaymentProvider, ProviderIntent,
        },
        payments::{
            generate_transaction_id, CreatePaymentInput, CreateRefundInput, PaymentLedger,
        },
    },
};

// ==================== Catalog fake ====================

#[derive(Default)]
pub struct FakeCatalog {
    products: Mutex<HashMap<Uuid, ProductSnapshot>>,
    fail_adjust_for: Mutex<HashSet<Uuid>>,
    pub adjustments: Mutex<Vec<(Uuid, i32)>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, price: Decimal, stock: i32) -> Uuid {
        self.insert_product_with(price, stock, ProductStatus::Active, Some(Uuid::new_v4()))
    }

    pub fn insert_product_with(
        &self,
        price: Decimal,
        stock: i32,
        status: ProductStatus,
        seller_id: Option<Uuid>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.products.lock().unwrap().insert(
            id,
            ProductSnapshot {
                id,
                name: format!("Product {}", &id.to_string()[..8]),
                price,
                stock,
                status,
                seller_id,
            },
        );
        id
    }

    pub fn set_price(&self, id: Uuid, price: Decimal) {
        self.products.lock().unwrap().get_mut(&id).unwrap().price = price;
    }

    pub fn set_stock(&self, id: Uuid, stock: i32) {
        self.products.lock().unwrap().get_mut(&id).unwrap().stock = stock;
    }

    pub fn set_status(&self, id: Uuid, status: ProductStatus) {
        self.products.lock().unwrap().get_mut(&id).unwrap().status = status;
    }

    pub fn remove_product(&self, id: Uuid) {
        self.products.lock().unwrap().remove(&id);
    }

    pub fn stock_of(&self, id: Uuid) -> i32 {
        self.products.lock().unwrap()[&id].stock
    }

    pub fn fail_adjust_for(&self, id: Uuid) {
        self.fail_adjust_for.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn get_product(&self, id: Uuid) -> Result<Option<ProductSnapshot>, ServiceError> {
        Ok(self.products.lock().unwrap().get(&id).cloned())
    }

    async fn adjust_stock(&self, id: Uuid, delta: i32) -> Result<(), ServiceError> {
        if self.fail_adjust_for.lock().unwrap().contains(&id) {
            return Err(ServiceError::ExternalServiceError(
                "catalog unavailable".to_string(),
            ));
        }

        let mut products = self.products.lock().unwrap();
        let product = products
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;

        if delta < 0 && product.stock < -delta {
            return Err(ServiceError::InsufficientStock(format!(
                "Stock adjustment of {} rejected for product {}",
                delta, id
            )));
        }

        product.stock += delta;
        self.adjustments.lock().unwrap().push((id, delta));
        Ok(())
    }
}

// ==================== Payment provider fake ====================

pub struct FakePaymentProvider {
    pub decline_with: Mutex<Option<String>>,
    pub intents: Mutex<Vec<(Decimal, String)>>,
}

impl FakePaymentProvider {
    pub fn new() -> Self {
        Self {
            decline_with: Mutex::new(None),
            intents: Mutex::new(Vec::new()),
        }
    }

    pub fn decline(&self, reason: &str) {
        *self.decline_with.lock().unwrap() = Some(reason.to_string());
    }

    pub fn intent_count(&self) -> usize {
        self.intents.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        _metadata: serde_json::Value,
    ) -> Result<ProviderIntent, ServiceError> {
        let handle = Uuid::new_v4().simple().to_string();
        self.intents
            .lock()
            .unwrap()
            .push((amount, currency.to_string()));
        Ok(ProviderIntent {
            intent_id: format!("pi_test_{}", handle),
            client_secret: format!("pi_test_secret_{}", handle),
        })
    }

    async fn confirm(
        &self,
        intent_id: &str,
        _details: &PaymentMethodDetails,
    ) -> Result<ConfirmOutcome, ServiceError> {
        if let Some(reason) = self.decline_with.lock().unwrap().clone() {
            return Ok(ConfirmOutcome {
                status: ConfirmStatus::Failed,
                reference: intent_id.to_string(),
                failure_message: Some(reason),
            });
        }
        Ok(ConfirmOutcome {
            status: ConfirmStatus::Succeeded,
            reference: intent_id.to_string(),
            failure_message: None,
        })
    }
}

// ==================== Order store fake ====================

#[derive(Default)]
pub struct FakeOrderStore {
    orders: Mutex<HashMap<Uuid, OrderDetails>>,
    history: Mutex<HashMap<Uuid, Vec<order_status_history::Model>>>,
    pub fail_create: AtomicBool,
}

impl FakeOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn get_order(&self, id: Uuid) -> Option<OrderDetails> {
        self.orders.lock().unwrap().get(&id).cloned()
    }

    fn push_history(
        &self,
        order_id: Uuid,
        old_status: Option<String>,
        new_status: &str,
        notes: Option<String>,
    ) {
        self.history
            .lock()
            .unwrap()
            .entry(order_id)
            .or_default()
            .push(order_status_history::Model {
                id: Uuid::new_v4(),
                order_id,
                old_status,
                new_status: new_status.to_string(),
                notes,
                created_at: Utc::now(),
            });
    }
}

#[async_trait]
impl OrderStore for FakeOrderStore {
    async fn create(&self, new_order: NewOrder) -> Result<OrderDetails, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::DatabaseError(sea_orm::DbErr::Custom(
                "order insert failed".to_string(),
            )));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::Model {
            id: order_id,
            order_number: generate_order_number(),
            buyer_id: new_order.buyer_id,
            status: OrderStatus::Pending.as_str().to_string(),
            payment_status: OrderPaymentStatus::Pending.as_str().to_string(),
            payment_intent_id: None,
            subtotal: new_order.subtotal,
            tax: new_order.tax,
            shipping_cost: new_order.shipping_cost,
            total: new_order.total,
            shipping_line1: new_order.shipping_address.line1,
            shipping_line2: new_order.shipping_address.line2,
            shipping_city: new_order.shipping_address.city,
            shipping_state: new_order.shipping_address.state,
            shipping_postal_code: new_order.shipping_address.postal_code,
            shipping_country: new_order.shipping_address.country,
            payment_method: new_order.payment_method,
            created_at: now,
            updated_at: now,
        };
        let items = new_order
            .items
            .into_iter()
            .map(|i| order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: i.product_id,
                seller_id: i.seller_id,
                product_name: i.product_name,
                quantity: i.quantity,
                unit_price: i.unit_price,
                subtotal: i.subtotal,
                created_at: now,
            })
            .collect();

        let details = OrderDetails { order, items };
        self.orders.lock().unwrap().insert(order_id, details.clone());
        self.push_history(order_id, None, "pending", Some("Order created".to_string()));
        Ok(details)
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<OrderDetails>, ServiceError> {
        Ok(self.orders.lock().unwrap().get(&order_id).cloned())
    }

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<OrderDetails>, ServiceError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|d| d.order.order_number == order_number)
            .cloned())
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        notes: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let mut orders = self.orders.lock().unwrap();
        let details = orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let old_status = details.order.status.clone();
        details.order.status = new_status.as_str().to_string();
        details.order.updated_at = Utc::now();
        let updated = details.order.clone();
        drop(orders);

        self.push_history(order_id, Some(old_status), new_status.as_str(), notes);
        Ok(updated)
    }

    async fn update_payment_status(
        &self,
        order_id: Uuid,
        payment_status: OrderPaymentStatus,
        payment_intent_id: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        {
            let mut orders = self.orders.lock().unwrap();
            let details = orders
                .get_mut(&order_id)
                .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
            details.order.payment_status = payment_status.as_str().to_string();
            if payment_intent_id.is_some() {
                details.order.payment_intent_id = payment_intent_id;
            }
            details.order.updated_at = Utc::now();
        }

        if payment_status == OrderPaymentStatus::Completed {
            return self
                .update_status(
                    order_id,
                    OrderStatus::Processing,
                    Some("Payment received".to_string()),
                )
                .await;
        }

        Ok(self.orders.lock().unwrap()[&order_id].order.clone())
    }

    async fn status_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, ServiceError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_for_buyer(
        &self,
        buyer_id: Uuid,
        _page: u64,
        _per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<(Vec<OrderDetails>, u64), ServiceError> {
        let orders: Vec<OrderDetails> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.order.buyer_id == buyer_id)
            .filter(|d| {
                status
                    .map(|s| d.order.status == s.as_str())
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        let total = orders.len() as u64;
        Ok((orders, total))
    }

    async fn list_for_seller(
        &self,
        seller_id: Uuid,
        _page: u64,
        _per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<(Vec<OrderDetails>, u64), ServiceError> {
        let orders: Vec<OrderDetails> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.has_seller(seller_id))
            .filter(|d| {
                status
                    .map(|s| d.order.status == s.as_str())
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        let total = orders.len() as u64;
        Ok((orders, total))
    }
}

// ==================== Payment ledger fake ====================

#[derive(Default)]
pub struct FakePaymentLedger {
    payments: Mutex<HashMap<Uuid, payment_transaction::Model>>,
    refunds: Mutex<Vec<payment_refund::Model>>,
    pub fail_link: AtomicBool,
}

impl FakePaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payment_count(&self) -> usize {
        self.payments.lock().unwrap().len()
    }

    pub fn all_payments(&self) -> Vec<payment_transaction::Model> {
        self.payments.lock().unwrap().values().cloned().collect()
    }

    /// Seeds a succeeded payment, as if a past checkout completed.
    pub fn seed_succeeded(&self, buyer_id: Uuid, amount: Decimal) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.payments.lock().unwrap().insert(
            id,
            payment_transaction::Model {
                id,
                transaction_id: generate_transaction_id(),
                order_id: None,
                buyer_id,
                amount,
                currency: "USD".to_string(),
                payment_method: "card".to_string(),
                provider_intent_id: format!("pi_test_{}", id.simple()),
                status: PaymentStatus::Succeeded,
                metadata: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }
}

#[async_trait]
impl PaymentLedger for FakePaymentLedger {
    async fn create_pending(
        &self,
        input: CreatePaymentInput,
    ) -> Result<payment_transaction::Model, ServiceError> {
        let now = Utc::now();
        let model = payment_transaction::Model {
            id: Uuid::new_v4(),
            transaction_id: generate_transaction_id(),
            order_id: input.order_id,
            buyer_id: input.buyer_id,
            amount: input.amount,
            currency: input.currency,
            payment_method: input.payment_method,
            provider_intent_id: input.provider_intent_id,
            status: PaymentStatus::Pending,
            metadata: None,
            created_at: now,
            updated_at: now,
        };
        self.payments
            .lock()
            .unwrap()
            .insert(model.id, model.clone());
        Ok(model)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        metadata: Option<serde_json::Value>,
    ) -> Result<payment_transaction::Model, ServiceError> {
        let mut payments = self.payments.lock().unwrap();
        let payment = payments
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;
        payment.status = status;
        if metadata.is_some() {
            payment.metadata = metadata;
        }
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn link_to_order(&self, id: Uuid, order_id: Uuid) -> Result<(), ServiceError> {
        if self.fail_link.load(Ordering::SeqCst) {
            return Err(ServiceError::DatabaseError(sea_orm::DbErr::Custom(
                "link update failed".to_string(),
            )));
        }
        let mut payments = self.payments.lock().unwrap();
        let payment = payments
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;
        payment.order_id = Some(order_id);
        payment.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<payment_transaction::Model>, ServiceError> {
        Ok(self.payments.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_provider_intent_id(
        &self,
        provider_intent_id: &str,
    ) -> Result<Option<payment_transaction::Model>, ServiceError> {
        Ok(self
            .payments
            .lock()
            .unwrap()
            .values()
            .find(|p| p.provider_intent_id == provider_intent_id)
            .cloned())
    }

    async fn find_by_order_id(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<payment_transaction::Model>, ServiceError> {
        Ok(self
            .payments
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn create_refund(
        &self,
        input: CreateRefundInput,
    ) -> Result<payment_refund::Model, ServiceError> {
        let mut payments = self.payments.lock().unwrap();
        let payment = payments
            .get_mut(&input.payment_transaction_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Payment {} not found",
                    input.payment_transaction_id
                ))
            })?;

        if payment.status != PaymentStatus::Succeeded {
            return Err(ServiceError::InvalidOperation(
                "Only succeeded payments can be refunded".to_string(),
            ));
        }
        if input.amount <= Decimal::ZERO || input.amount > payment.amount {
            return Err(ServiceError::ValidationError(format!(
                "Refund amount must be between 0 and {}",
                payment.amount
            )));
        }

        let refund = payment_refund::Model {
            id: Uuid::new_v4(),
            payment_transaction_id: payment.id,
            amount: input.amount,
            reason: input.reason,
            provider_refund_id: input.provider_refund_id,
            status: "succeeded".to_string(),
            created_at: Utc::now(),
        };
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push(refund.clone());

        let refunded_total: Decimal = refunds
            .iter()
            .filter(|r| r.payment_transaction_id == payment.id)
            .map(|r| r.amount)
            .sum();
        if refunded_total >= payment.amount {
            payment.status = PaymentStatus::Refunded;
        }

        Ok(refund)
    }

    async fn list_for_buyer(
        &self,
        buyer_id: Uuid,
        _page: u64,
        _per_page: u64,
    ) -> Result<(Vec<payment_transaction::Model>, u64), ServiceError> {
        let payments: Vec<payment_transaction::Model> = self
            .payments
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.buyer_id == buyer_id)
            .cloned()
            .collect();
        let total = payments.len() as u64;
        Ok((payments, total))
    }
}

// ==================== Flaky cart backend ====================

/// Wraps the in-memory backend and fails deletes on demand, to exercise the
/// best-effort cart clear step.
pub struct FlakyCartBackend {
    inner: MemoryCartBackend,
    pub fail_delete: AtomicBool,
}

impl FlakyCartBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryCartBackend::new(),
            fail_delete: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CartBackend for FlakyCartBackend {
    async fn get_all(
        &self,
        key: &str,
    ) -> Result<HashMap<String, String>, ServiceError> {
        self.inner.get_all(key).await
    }

    async fn set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: std::time::Duration,
    ) -> Result<(), ServiceError> {
        self.inner.set_field(key, field, value, ttl).await
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<(), ServiceError> {
        self.inner.delete_field(key, field).await
    }

    async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(ServiceError::CacheError("cache unreachable".to_string()));
        }
        self.inner.delete(key).await
    }
}

// ==================== Harness ====================

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        redis_url: "redis://localhost:6379".to_string(),
        host: "127.0.0.1".to_string(),
        port: 8080,
        environment: "test".to_string(),
        log_level: "info".to_string(),
        log_json: false,
        auto_migrate: false,
        tax_rate: 0.10,
        free_shipping_threshold: dec!(100),
        shipping_flat_fee: dec!(10),
        currency: "USD".to_string(),
        cart_ttl_days: 7,
        payment_webhook_secret: None,
        payment_webhook_tolerance_secs: None,
        event_channel_capacity: 1024,
    }
}

pub fn buyer() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: Role::Buyer,
    }
}

pub fn shipping_address() -> ShippingAddress {
    ShippingAddress {
        line1: "123 Test Street".to_string(),
        line2: None,
        city: "Test City".to_string(),
        state: "CA".to_string(),
        postal_code: "90210".to_string(),
        country: "US".to_string(),
    }
}

pub struct TestHarness {
    pub catalog: Arc<FakeCatalog>,
    pub provider: Arc<FakePaymentProvider>,
    pub orders: Arc<FakeOrderStore>,
    pub payments: Arc<FakePaymentLedger>,
    pub cart_backend: Arc<FlakyCartBackend>,
    pub cart: CartService,
    pub checkout: CheckoutService,
    // Keeps the event channel open for the lifetime of the test.
    _event_rx: mpsc::Receiver<Event>,
}

impl TestHarness {
    pub fn new() -> Self {
        let config = Arc::new(test_config());
        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let events = Arc::new(EventSender::new(tx));

        let catalog = Arc::new(FakeCatalog::new());
        let provider = Arc::new(FakePaymentProvider::new());
        let orders = Arc::new(FakeOrderStore::new());
        let payments = Arc::new(FakePaymentLedger::new());
        let cart_backend = Arc::new(FlakyCartBackend::new());

        let cart = CartService::new(
            cart_backend.clone(),
            catalog.clone(),
            events.clone(),
            &config,
        );

        let checkout = CheckoutService::new(
            cart.clone(),
            catalog.clone(),
            provider.clone(),
            orders.clone(),
            payments.clone(),
            events.clone(),
            config,
        );

        Self {
            catalog,
            provider,
            orders,
            payments,
            cart_backend,
            cart,
            checkout,
            _event_rx: rx,
        }
    }
}
