use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    cart::{CartService, CartView},
    catalog::CatalogClient,
    config::AppConfig,
    entities::payment_transaction::PaymentStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        orders::{NewOrder, NewOrderItem, OrderPaymentStatus, OrderStore, ShippingAddress},
        payment_provider::{ConfirmStatus, PaymentMethodDetails, PaymentProvider},
        payments::{CreatePaymentInput, PaymentLedger},
    },
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub shipping_address: ShippingAddress,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
    /// Instrument token from the client, forwarded to the provider
    #[serde(default)]
    pub payment_token: Option<String>,
}

fn default_payment_method() -> String {
    "card".to_string()
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub total: Decimal,
    /// Provider intent id; the correlation handle for webhooks, refunds and
    /// manual reconciliation
    pub payment_reference: String,
}

/// Checkout totals, rounded to currency precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
}

/// Deterministic pricing: tax on the subtotal, flat shipping below the
/// free-shipping threshold. A subtotal exactly at the threshold still pays
/// shipping (strict greater-than).
pub fn compute_totals(subtotal: Decimal, config: &AppConfig) -> Totals {
    let subtotal = subtotal.round_dp(2);
    let tax_rate = Decimal::from_f64_retain(config.tax_rate).unwrap_or(Decimal::ZERO);
    let tax = (subtotal * tax_rate).round_dp(2);
    let shipping_cost = if subtotal > config.free_shipping_threshold {
        Decimal::ZERO
    } else {
        config.shipping_flat_fee
    };
    let total = (subtotal + tax + shipping_cost).round_dp(2);

    Totals {
        subtotal,
        tax,
        shipping_cost,
        total,
    }
}

/// Orchestrates cart-to-order conversion as a sequential saga.
///
/// Steps 1-4 (validate, price, create intent, confirm) must succeed or the
/// whole flow aborts with no side effects beyond the pending payment row.
/// Step 5 (order creation) is the single commit point. Steps 6-8 (stock
/// decrement, cart clear, payment link) are best-effort: once money has
/// moved and the order exists, nothing is allowed to undo it.
#[derive(Clone)]
pub struct CheckoutService {
    cart: CartService,
    catalog: Arc<dyn CatalogClient>,
    provider: Arc<dyn PaymentProvider>,
    orders: Arc<dyn OrderStore>,
    payments: Arc<dyn PaymentLedger>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        cart: CartService,
        catalog: Arc<dyn CatalogClient>,
        provider: Arc<dyn PaymentProvider>,
        orders: Arc<dyn OrderStore>,
        payments: Arc<dyn PaymentLedger>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            cart,
            catalog,
            provider,
            orders,
            payments,
            event_sender,
            config,
        }
    }

    #[instrument(skip(self, request), fields(buyer_id = %buyer.user_id))]
    pub async fn checkout(
        &self,
        buyer: &AuthUser,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        let owner = buyer.cart_owner();

        self.event_sender
            .send_or_log(Event::CheckoutStarted {
                buyer_id: buyer.user_id,
            })
            .await;

        // Step 1: fetch and validate. Both failure modes abort before any
        // side effect.
        let validation = self.cart.validate(&owner).await?;
        if validation.cart.is_empty() && validation.errors.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }
        if !validation.valid {
            return Err(ServiceError::CartInvalid(validation.errors));
        }
        let cart = validation.cart;

        // Step 2: price the cart.
        let totals = compute_totals(cart.total, &self.config);

        // Step 3: create the provider intent, then the pending ledger row
        // with no order reference. Intent-before-order is deliberate: no
        // order can ever exist without at least an attempted payment record.
        let metadata = json!({
            "buyer_id": buyer.user_id,
            "items": cart
                .items
                .iter()
                .map(|i| json!({ "product_id": i.product_id, "quantity": i.quantity }))
                .collect::<Vec<_>>(),
        });
        let intent = self
            .provider
            .create_intent(totals.total, &self.config.currency, metadata)
            .await?;

        let payment = self
            .payments
            .create_pending(CreatePaymentInput {
                order_id: None,
                buyer_id: buyer.user_id,
                amount: totals.total,
                currency: self.config.currency.clone(),
                payment_method: request.payment_method.clone(),
                provider_intent_id: intent.intent_id.clone(),
            })
            .await?;

        // Step 4: confirm with the provider. A declined charge ends the
        // checkout; the ledger row stays behind for audit and retry.
        let details = PaymentMethodDetails {
            method: request.payment_method.clone(),
            token: request.payment_token.clone(),
        };
        let outcome = self.provider.confirm(&intent.intent_id, &details).await?;

        if outcome.status == ConfirmStatus::Failed {
            let reason = outcome
                .failure_message
                .unwrap_or_else(|| "Payment was not successful".to_string());
            if let Err(e) = self
                .payments
                .update_status(
                    payment.id,
                    PaymentStatus::Failed,
                    Some(json!({ "failure_message": reason.clone() })),
                )
                .await
            {
                warn!(error = %e, payment_id = %payment.id, "Failed to mark declined payment");
            }
            self.event_sender
                .send_or_log(Event::PaymentDeclined {
                    payment_id: payment.id,
                    reason: reason.clone(),
                })
                .await;
            return Err(ServiceError::PaymentDeclined(reason));
        }

        self.event_sender
            .send_or_log(Event::PaymentConfirmed {
                payment_id: payment.id,
            })
            .await;

        // Step 5: the commit point. Failure here, after money moved, is a
        // reportable inconsistency carrying the provider reference; the
        // refund decision belongs to an operator, not this code path.
        let new_order = self.build_order(buyer.user_id, &cart, &totals, &request).await;
        let order = match self.orders.create(new_order).await {
            Ok(order) => order,
            Err(source) => {
                return Err(ServiceError::PostPaymentInconsistency {
                    payment_reference: intent.intent_id,
                    source: Box::new(source),
                });
            }
        };

        // Step 6: decrement stock per line, independently. The order is
        // committed and charged; one bad line must not block the others or
        // roll anything back.
        for item in &cart.items {
            if let Err(e) = self
                .catalog
                .adjust_stock(item.product_id, -item.quantity)
                .await
            {
                warn!(
                    order_id = %order.order.id,
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    error = %e,
                    "Stock decrement failed after order commit"
                );
                self.event_sender
                    .send_or_log(Event::StockDecrementFailed {
                        order_id: order.order.id,
                        product_id: item.product_id,
                        quantity: item.quantity,
                        reason: e.to_string(),
                    })
                    .await;
            }
        }

        // Step 7: clear the cart, best-effort.
        if let Err(e) = self.cart.clear(&owner).await {
            warn!(order_id = %order.order.id, error = %e, "Cart clear failed after order commit");
            self.event_sender
                .send_or_log(Event::CartClearFailed {
                    order_id: order.order.id,
                    owner: owner.clone(),
                    reason: e.to_string(),
                })
                .await;
        }

        // Step 8: back-link the payment and propagate the completed payment
        // status, which advances the order to processing. Both records exist
        // and are queryable on their own if this fails.
        if let Err(e) = self.link_payment(payment.id, &order.order.id, &intent.intent_id).await {
            warn!(
                order_id = %order.order.id,
                payment_id = %payment.id,
                error = %e,
                "Payment link failed after order commit"
            );
            self.event_sender
                .send_or_log(Event::PaymentLinkFailed {
                    order_id: order.order.id,
                    payment_id: payment.id,
                    reason: e.to_string(),
                })
                .await;
        }

        info!(
            order_id = %order.order.id,
            order_number = %order.order.order_number,
            total = %totals.total,
            "Checkout completed"
        );

        Ok(CheckoutResponse {
            order_id: order.order.id,
            order_number: order.order.order_number,
            total: totals.total,
            payment_reference: intent.intent_id,
        })
    }

    /// Assembles the order from the validated cart, resolving each line's
    /// seller through the catalog when the cart snapshot lacks it. A seller
    /// that cannot be resolved is logged and left null; a missing seller id
    /// must never block a paid order.
    async fn build_order(
        &self,
        buyer_id: Uuid,
        cart: &CartView,
        totals: &Totals,
        request: &CheckoutRequest,
    ) -> NewOrder {
        let mut items = Vec::with_capacity(cart.items.len());
        for line in &cart.items {
            let seller_id = match line.seller_id {
                Some(id) => Some(id),
                None => match self.catalog.get_product(line.product_id).await {
                    Ok(Some(product)) => product.seller_id,
                    Ok(None) | Err(_) => {
                        warn!(product_id = %line.product_id, "Could not resolve seller for order line");
                        None
                    }
                },
            };

            items.push(NewOrderItem {
                product_id: line.product_id,
                seller_id,
                product_name: line.product_name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                subtotal: line.subtotal,
            });
        }

        NewOrder {
            buyer_id,
            items,
            subtotal: totals.subtotal,
            tax: totals.tax,
            shipping_cost: totals.shipping_cost,
            total: totals.total,
            shipping_address: request.shipping_address.clone(),
            payment_method: request.payment_method.clone(),
        }
    }

    async fn link_payment(
        &self,
        payment_id: Uuid,
        order_id: &Uuid,
        intent_id: &str,
    ) -> Result<(), ServiceError> {
        self.payments.link_to_order(payment_id, *order_id).await?;
        self.payments
            .update_status(
                payment_id,
                PaymentStatus::Succeeded,
                Some(json!({ "reference": intent_id })),
            )
            .await?;
        self.orders
            .update_payment_status(
                *order_id,
                OrderPaymentStatus::Completed,
                Some(intent_id.to_string()),
            )
            .await?;
        Ok(())
    }
}
