pub mod order;
pub mod order_item;
pub mod order_status_history;
pub mod payment_refund;
pub mod payment_transaction;
pub mod product;

pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use order_status_history::Entity as OrderStatusHistory;
pub use payment_refund::Entity as PaymentRefund;
pub use payment_transaction::Entity as PaymentTransaction;
pub use product::Entity as Product;
