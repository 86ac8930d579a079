pub mod cart;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use std::sync::Arc;

use crate::{
    cart::CartService,
    catalog::CatalogClient,
    services::{checkout::CheckoutService, orders::OrderStore, payments::PaymentLedger},
};

/// Aggregated services used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub cart: CartService,
    pub checkout: CheckoutService,
    pub orders: Arc<dyn OrderStore>,
    pub payments: Arc<dyn PaymentLedger>,
    pub catalog: Arc<dyn CatalogClient>,
}
