use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the cart, checkout, order and payment services.
///
/// Best-effort saga steps report their failures here as well as in logs, so
/// reconciliation tooling has a machine-readable trail of every partial
/// failure that was deliberately not surfaced to the buyer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemAdded {
        owner: String,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemUpdated {
        owner: String,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        owner: String,
        product_id: Uuid,
    },
    CartCleared {
        owner: String,
    },
    CartsMerged {
        guest_owner: String,
        user_owner: String,
    },

    // Checkout / order events
    CheckoutStarted {
        buyer_id: Uuid,
    },
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderPaymentStatusChanged {
        order_id: Uuid,
        payment_status: String,
    },

    // Payment events
    PaymentIntentCreated {
        payment_id: Uuid,
        provider_intent_id: String,
        amount: Decimal,
    },
    PaymentConfirmed {
        payment_id: Uuid,
    },
    PaymentDeclined {
        payment_id: Uuid,
        reason: String,
    },
    PaymentLinked {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentRefunded {
        payment_id: Uuid,
        amount: Decimal,
        full_refund: bool,
    },

    // Best-effort step failures, post order commit
    StockDecrementFailed {
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        reason: String,
    },
    CartClearFailed {
        order_id: Uuid,
        owner: String,
        reason: String,
    },
    PaymentLinkFailed {
        order_id: Uuid,
        payment_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing the failure to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Event delivery must never abort a store operation.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            warn!(error = %e, ?event, "Dropped event");
        }
    }
}

/// Drains the event channel. Consumers beyond logging (webhook fan-out,
/// analytics export) subscribe here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockDecrementFailed {
                order_id,
                product_id,
                quantity,
                reason,
            } => {
                warn!(
                    order_id = %order_id,
                    product_id = %product_id,
                    quantity,
                    reason = %reason,
                    "Stock decrement failed after order commit; flagged for reconciliation"
                );
            }
            Event::CartClearFailed {
                order_id, owner, reason, ..
            } => {
                warn!(order_id = %order_id, owner = %owner, reason = %reason, "Cart clear failed after order commit");
            }
            Event::PaymentLinkFailed {
                order_id,
                payment_id,
                reason,
            } => {
                warn!(
                    order_id = %order_id,
                    payment_id = %payment_id,
                    reason = %reason,
                    "Payment link failed; order and payment remain individually queryable"
                );
            }
            other => {
                info!("Event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender
            .send(Event::OrderCreated(Uuid::new_v4()))
            .await
            .expect("send should succeed");

        assert!(matches!(rx.recv().await, Some(Event::OrderCreated(_))));
    }

    #[tokio::test]
    async fn test_send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or error out even though the receiver is gone.
        sender
            .send_or_log(Event::CartCleared {
                owner: "buyer".to_string(),
            })
            .await;
    }
}
