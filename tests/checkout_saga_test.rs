//! Orchestration tests for the checkout saga, run against in-memory stores.
//!
//! Covers the abort/commit/best-effort boundaries: steps before the order
//! commit abort with no side effects, order creation is the single commit
//! point, and everything after it is best-effort and never undoes the order.

mod common;

use assert_matches::assert_matches;
use common::{buyer, shipping_address, TestHarness};
use cloudretail_api::{
    catalog::ProductStatus,
    entities::payment_transaction::PaymentStatus,
    errors::ServiceError,
    services::{checkout::CheckoutRequest, orders::OrderStore},
};
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;

fn checkout_request() -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: shipping_address(),
        payment_method: "card".to_string(),
        payment_token: Some("tok_test".to_string()),
    }
}

#[tokio::test]
async fn test_empty_cart_checkout_has_no_side_effects() {
    let h = TestHarness::new();
    let user = buyer();

    let err = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidOperation(msg) if msg.contains("empty"));
    assert_eq!(h.provider.intent_count(), 0);
    assert_eq!(h.payments.payment_count(), 0);
    assert_eq!(h.orders.order_count(), 0);
    assert!(h.catalog.adjustments.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_cart_aborts_with_structured_errors() {
    let h = TestHarness::new();
    let user = buyer();

    let product = h.catalog.insert_product(dec!(50.00), 10);
    h.cart
        .add_item(&user.cart_owner(), product, 2)
        .await
        .unwrap();

    // Price moves after the item was added; the gate must catch it.
    h.catalog.set_price(product, dec!(55.00));

    let err = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap_err();

    let errors = assert_matches!(err, ServiceError::CartInvalid(errors) => errors);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].product_id, product);
    assert_eq!(errors[0].new_price, Some(dec!(55.00)));

    // No side effects of any kind.
    assert_eq!(h.provider.intent_count(), 0);
    assert_eq!(h.payments.payment_count(), 0);
    assert_eq!(h.orders.order_count(), 0);
    assert_eq!(h.catalog.stock_of(product), 10);
    assert!(!h.cart.get_cart(&user.cart_owner()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_stock_aborts_before_payment() {
    let h = TestHarness::new();
    let user = buyer();

    let product = h.catalog.insert_product(dec!(20.00), 5);
    h.cart
        .add_item(&user.cart_owner(), product, 5)
        .await
        .unwrap();

    // A concurrent purchase drains the stock before this checkout runs.
    h.catalog.set_stock(product, 3);

    let err = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap_err();

    let errors = assert_matches!(err, ServiceError::CartInvalid(errors) => errors);
    assert_eq!(errors[0].current_stock, Some(3));
    assert_eq!(h.payments.payment_count(), 0);
}

#[tokio::test]
async fn test_happy_path_end_to_end() {
    let h = TestHarness::new();
    let user = buyer();

    // cart = [{qty 2, price 50}], stock 10: subtotal 100, tax 10, shipping
    // 10 (exactly at the threshold does not qualify for free shipping).
    let product = h.catalog.insert_product(dec!(50.00), 10);
    h.cart
        .add_item(&user.cart_owner(), product, 2)
        .await
        .unwrap();

    let response = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap();

    assert_eq!(response.total, dec!(120.00));
    assert!(response.order_number.starts_with("ORD-"));
    assert!(response.payment_reference.starts_with("pi_test_"));

    // Order committed with the computed financials.
    let order = h.orders.get_order(response.order_id).unwrap();
    assert_eq!(order.order.subtotal, dec!(100.00));
    assert_eq!(order.order.tax, dec!(10.00));
    assert_eq!(order.order.shipping_cost, dec!(10));
    assert_eq!(order.order.total, dec!(120.00));
    assert_eq!(order.order.buyer_id, user.user_id);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].quantity, 2);
    assert_eq!(order.items[0].unit_price, dec!(50.00));

    // Stock decremented, cart cleared.
    assert_eq!(h.catalog.stock_of(product), 8);
    assert!(h.cart.get_cart(&user.cart_owner()).await.unwrap().is_empty());

    // Payment linked, promoted, and propagated: completed payment status
    // force-advances the order to processing.
    let payments = h.payments.all_payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Succeeded);
    assert_eq!(payments[0].order_id, Some(response.order_id));

    let order = h.orders.get_order(response.order_id).unwrap();
    assert_eq!(order.order.payment_status, "completed");
    assert_eq!(order.order.status, "processing");

    // History: created (pending), then payment received (processing).
    let history = h.orders.status_history(response.order_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].new_status, "pending");
    assert_eq!(history[1].new_status, "processing");
    assert_eq!(history[1].notes.as_deref(), Some("Payment received"));
}

#[tokio::test]
async fn test_free_shipping_above_threshold() {
    let h = TestHarness::new();
    let user = buyer();

    let product = h.catalog.insert_product(dec!(60.00), 10);
    h.cart
        .add_item(&user.cart_owner(), product, 2)
        .await
        .unwrap();

    let response = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap();

    // subtotal 120 > 100: free shipping, total = 120 * 1.10.
    assert_eq!(response.total, dec!(132.00));
    let order = h.orders.get_order(response.order_id).unwrap();
    assert_eq!(order.order.shipping_cost, dec!(0));
}

#[tokio::test]
async fn test_declined_payment_leaves_no_order_and_a_failed_row() {
    let h = TestHarness::new();
    let user = buyer();

    let product = h.catalog.insert_product(dec!(50.00), 10);
    h.cart
        .add_item(&user.cart_owner(), product, 1)
        .await
        .unwrap();
    h.provider.decline("card_declined");

    let err = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::PaymentDeclined(reason) if reason == "card_declined");

    // No order, no stock movement, cart untouched.
    assert_eq!(h.orders.order_count(), 0);
    assert_eq!(h.catalog.stock_of(product), 10);
    assert!(!h.cart.get_cart(&user.cart_owner()).await.unwrap().is_empty());

    // The payment row is retained for audit with the provider reference,
    // marked failed per the provider outcome, never linked to anything.
    let payments = h.payments.all_payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert_eq!(payments[0].order_id, None);
    assert!(payments[0].provider_intent_id.starts_with("pi_test_"));
}

#[tokio::test]
async fn test_order_failure_after_payment_surfaces_reference() {
    let h = TestHarness::new();
    let user = buyer();

    let product = h.catalog.insert_product(dec!(50.00), 10);
    h.cart
        .add_item(&user.cart_owner(), product, 1)
        .await
        .unwrap();
    h.orders.fail_create.store(true, Ordering::SeqCst);

    let err = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap_err();

    // The caller gets the provider reference for out-of-band reconciliation.
    let reference = assert_matches!(
        err,
        ServiceError::PostPaymentInconsistency { payment_reference, .. } => payment_reference
    );
    assert!(reference.starts_with("pi_test_"));

    // No order exists; the payment row stays unlinked and is not refunded.
    assert_eq!(h.orders.order_count(), 0);
    let payments = h.payments.all_payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].order_id, None);
    assert_ne!(payments[0].status, PaymentStatus::Refunded);

    // Best-effort steps never ran: stock and cart are untouched.
    assert_eq!(h.catalog.stock_of(product), 10);
    assert!(!h.cart.get_cart(&user.cart_owner()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_one_failed_decrement_does_not_block_the_others() {
    let h = TestHarness::new();
    let user = buyer();

    let product_1 = h.catalog.insert_product(dec!(10.00), 10);
    let product_2 = h.catalog.insert_product(dec!(10.00), 10);
    let product_3 = h.catalog.insert_product(dec!(10.00), 10);
    for (product, qty) in [(product_1, 1), (product_2, 2), (product_3, 3)] {
        h.cart
            .add_item(&user.cart_owner(), product, qty)
            .await
            .unwrap();
    }
    h.catalog.fail_adjust_for(product_2);

    let response = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap();

    // Items 1 and 3 decremented; item 2 untouched; the order stands and its
    // status is unaffected by the stock step.
    assert_eq!(h.catalog.stock_of(product_1), 9);
    assert_eq!(h.catalog.stock_of(product_2), 10);
    assert_eq!(h.catalog.stock_of(product_3), 7);

    let order = h.orders.get_order(response.order_id).unwrap();
    assert_eq!(order.items.len(), 3);
    assert_eq!(order.order.status, "processing");
    assert_eq!(order.order.payment_status, "completed");
}

#[tokio::test]
async fn test_cart_clear_failure_is_not_fatal() {
    let h = TestHarness::new();
    let user = buyer();

    let product = h.catalog.insert_product(dec!(50.00), 10);
    h.cart
        .add_item(&user.cart_owner(), product, 1)
        .await
        .unwrap();
    h.cart_backend.fail_delete.store(true, Ordering::SeqCst);

    let response = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap();

    // The order exists and the payment is linked even though the cart
    // could not be cleared.
    assert!(h.orders.get_order(response.order_id).is_some());
    let payments = h.payments.all_payments();
    assert_eq!(payments[0].order_id, Some(response.order_id));
    assert_eq!(payments[0].status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn test_payment_link_failure_is_not_fatal() {
    let h = TestHarness::new();
    let user = buyer();

    let product = h.catalog.insert_product(dec!(50.00), 10);
    h.cart
        .add_item(&user.cart_owner(), product, 1)
        .await
        .unwrap();
    h.payments.fail_link.store(true, Ordering::SeqCst);

    let response = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap();

    // Checkout reports success; both records exist independently and stay
    // individually queryable for reconciliation.
    let order = h.orders.get_order(response.order_id).unwrap();
    assert_eq!(order.order.status, "pending");
    assert_eq!(order.order.payment_status, "pending");

    let payments = h.payments.all_payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].order_id, None);
    assert_eq!(
        payments[0].provider_intent_id,
        response.payment_reference
    );
}

#[tokio::test]
async fn test_seller_id_resolved_from_catalog_fallback() {
    let h = TestHarness::new();
    let user = buyer();

    // A product listed without a seller must not block a paid order.
    let orphan = h
        .catalog
        .insert_product_with(dec!(25.00), 5, ProductStatus::Active, None);
    h.cart.add_item(&user.cart_owner(), orphan, 1).await.unwrap();

    let response = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap();

    let order = h.orders.get_order(response.order_id).unwrap();
    assert_eq!(order.items[0].seller_id, None);
}

#[tokio::test]
async fn test_intent_is_created_for_the_rounded_total() {
    let h = TestHarness::new();
    let user = buyer();

    let product = h.catalog.insert_product(dec!(19.99), 10);
    h.cart
        .add_item(&user.cart_owner(), product, 3)
        .await
        .unwrap();

    let response = h
        .checkout
        .checkout(&user, checkout_request())
        .await
        .unwrap();

    // 59.97 + 6.00 tax (rounded) + 10 shipping
    assert_eq!(response.total, dec!(75.97));
    let intents = h.provider.intents.lock().unwrap();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].0, dec!(75.97));
    assert_eq!(intents[0].1, "USD");
}
