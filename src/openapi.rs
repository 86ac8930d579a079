use utoipa::OpenApi;

use crate::{cart, errors, handlers, services};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CloudRetail API",
        description = "Cart storage, checkout orchestration, order lifecycle and payment bookkeeping for the CloudRetail marketplace"
    ),
    paths(
        handlers::health::health,
        handlers::cart::get_cart,
        handlers::cart::add_item,
        handlers::cart::update_item,
        handlers::cart::remove_item,
        handlers::cart::clear_cart,
        handlers::cart::merge_cart,
        handlers::cart::validate_cart,
        handlers::checkout::checkout,
        handlers::orders::list_my_orders,
        handlers::orders::list_seller_orders,
        handlers::orders::get_order,
        handlers::orders::get_order_history,
        handlers::orders::update_order_status,
        handlers::orders::update_payment_status,
        handlers::payments::payment_history,
        handlers::payments::get_payment,
        handlers::payments::create_refund,
        handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::entities::order::Model,
        crate::entities::order_item::Model,
        crate::entities::order_status_history::Model,
        crate::entities::payment_transaction::Model,
        crate::entities::payment_transaction::PaymentStatus,
        crate::entities::payment_refund::Model,
        errors::ErrorResponse,
        errors::CartLineError,
        cart::CartLine,
        cart::CartView,
        cart::CartValidation,
        handlers::cart::AddItemRequest,
        handlers::cart::UpdateItemRequest,
        handlers::cart::MergeCartRequest,
        handlers::orders::UpdateStatusRequest,
        handlers::orders::UpdatePaymentStatusRequest,
        handlers::payments::CreateRefundRequest,
        handlers::health::HealthResponse,
        services::checkout::CheckoutRequest,
        services::checkout::CheckoutResponse,
        services::orders::OrderDetails,
        services::orders::OrderStatus,
        services::orders::OrderPaymentStatus,
        services::orders::ShippingAddress,
    )),
    tags(
        (name = "Cart", description = "Per-user cart storage"),
        (name = "Checkout", description = "Cart-to-order orchestration"),
        (name = "Orders", description = "Order lifecycle and history"),
        (name = "Payments", description = "Payment bookkeeping and refunds"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;
