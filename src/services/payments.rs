use async_trait::async_trait;
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        payment_refund, payment_transaction,
        payment_transaction::PaymentStatus,
        PaymentRefund, PaymentTransaction,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Input for recording a pending payment attempt. `order_id` is usually
/// `None` at this point: the charge is attempted before the order exists.
#[derive(Debug, Clone)]
pub struct CreatePaymentInput {
    pub order_id: Option<Uuid>,
    pub buyer_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub provider_intent_id: String,
}

#[derive(Debug, Clone)]
pub struct CreateRefundInput {
    pub payment_transaction_id: Uuid,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub provider_refund_id: String,
}

/// Payment bookkeeping contract: transaction rows, their weak back-reference
/// to orders, and refund records.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn create_pending(
        &self,
        input: CreatePaymentInput,
    ) -> Result<payment_transaction::Model, ServiceError>;

    async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        metadata: Option<serde_json::Value>,
    ) -> Result<payment_transaction::Model, ServiceError>;

    /// Sets the order back-reference. Kept separate from status updates so a
    /// payment can exist, succeed and be audited without any order.
    async fn link_to_order(&self, id: Uuid, order_id: Uuid) -> Result<(), ServiceError>;

    async fn find_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<payment_transaction::Model>, ServiceError>;

    /// Lookup by the provider's intent id. This is what makes webhook
    /// redelivery idempotent.
    async fn find_by_provider_intent_id(
        &self,
        provider_intent_id: &str,
    ) -> Result<Option<payment_transaction::Model>, ServiceError>;

    async fn find_by_order_id(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<payment_transaction::Model>, ServiceError>;

    /// Records a refund against a succeeded payment. When cumulative
    /// succeeded refunds reach the full amount, the parent flips to
    /// `refunded`.
    async fn create_refund(
        &self,
        input: CreateRefundInput,
    ) -> Result<payment_refund::Model, ServiceError>;

    async fn list_for_buyer(
        &self,
        buyer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<payment_transaction::Model>, u64), ServiceError>;
}

/// Generates a unique human-pasteable transaction id.
pub fn generate_transaction_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("TXN-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Payment ledger backed by the relational payment tables.
#[derive(Clone)]
pub struct SqlPaymentLedger {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl SqlPaymentLedger {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }
}

#[async_trait]
impl PaymentLedger for SqlPaymentLedger {
    #[instrument(skip(self, input), fields(buyer_id = %input.buyer_id, amount = %input.amount))]
    async fn create_pending(
        &self,
        input: CreatePaymentInput,
    ) -> Result<payment_transaction::Model, ServiceError> {
        let now = Utc::now();
        let payment = payment_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            transaction_id: Set(generate_transaction_id()),
            order_id: Set(input.order_id),
            buyer_id: Set(input.buyer_id),
            amount: Set(input.amount),
            currency: Set(input.currency),
            payment_method: Set(input.payment_method),
            provider_intent_id: Set(input.provider_intent_id),
            status: Set(PaymentStatus::Pending),
            metadata: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let payment = payment.insert(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                payment_id: payment.id,
                provider_intent_id: payment.provider_intent_id.clone(),
                amount: payment.amount,
            })
            .await;

        info!(payment_id = %payment.id, "Pending payment recorded");
        Ok(payment)
    }

    #[instrument(skip(self, metadata))]
    async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        metadata: Option<serde_json::Value>,
    ) -> Result<payment_transaction::Model, ServiceError> {
        let payment = PaymentTransaction::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;

        let mut active: payment_transaction::ActiveModel = payment.into();
        active.status = Set(status);
        if metadata.is_some() {
            active.metadata = Set(metadata);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;
        info!(payment_id = %id, status = ?updated.status, "Payment status updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn link_to_order(&self, id: Uuid, order_id: Uuid) -> Result<(), ServiceError> {
        let payment = PaymentTransaction::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;

        let mut active: payment_transaction::ActiveModel = payment.into();
        active.order_id = Set(Some(order_id));
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::PaymentLinked {
                payment_id: id,
                order_id,
            })
            .await;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<payment_transaction::Model>, ServiceError> {
        Ok(PaymentTransaction::find_by_id(id).one(&*self.db).await?)
    }

    async fn find_by_provider_intent_id(
        &self,
        provider_intent_id: &str,
    ) -> Result<Option<payment_transaction::Model>, ServiceError> {
        Ok(PaymentTransaction::find()
            .filter(payment_transaction::Column::ProviderIntentId.eq(provider_intent_id))
            .one(&*self.db)
            .await?)
    }

    async fn find_by_order_id(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<payment_transaction::Model>, ServiceError> {
        Ok(PaymentTransaction::find()
            .filter(payment_transaction::Column::OrderId.eq(Some(order_id)))
            .order_by_desc(payment_transaction::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, input), fields(payment_id = %input.payment_transaction_id, amount = %input.amount))]
    async fn create_refund(
        &self,
        input: CreateRefundInput,
    ) -> Result<payment_refund::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start refund transaction");
            ServiceError::DatabaseError(e)
        })?;

        let payment = PaymentTransaction::find_by_id(input.payment_transaction_id)
            .one(&txn)
            .await?
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

        let refund = payment_refund::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_transaction_id: Set(payment.id),
            amount: Set(input.amount),
            reason: Set(input.reason),
            provider_refund_id: Set(input.provider_refund_id),
            status: Set("succeeded".to_string()),
            created_at: Set(Utc::now()),
        };
        let refund = refund.insert(&txn).await?;

        let refunded_total: Decimal = PaymentRefund::find()
            .filter(payment_refund::Column::PaymentTransactionId.eq(payment.id))
            .filter(payment_refund::Column::Status.eq("succeeded"))
            .all(&txn)
            .await?
            .iter()
            .map(|r| r.amount)
            .sum();

        let full_refund = refunded_total >= payment.amount;
        let payment_id = payment.id;
        let payment_amount = payment.amount;
        if full_refund {
            let mut active: payment_transaction::ActiveModel = payment.into();
            active.status = Set(PaymentStatus::Refunded);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentRefunded {
                payment_id,
                amount: refund.amount,
                full_refund,
            })
            .await;

        info!(
            payment_id = %payment_id,
            refund_id = %refund.id,
            amount = %refund.amount,
            total_refunded = %refunded_total,
            payment_amount = %payment_amount,
            full_refund,
            "Refund recorded"
        );
        Ok(refund)
    }

    async fn list_for_buyer(
        &self,
        buyer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<payment_transaction::Model>, u64), ServiceError> {
        let paginator = PaymentTransaction::find()
            .filter(payment_transaction::Column::BuyerId.eq(buyer_id))
            .order_by_desc(payment_transaction::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((data, total))
    }
}
