use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Provider-side handle for an attempt to collect funds. Created before the
/// order it may eventually be linked to.
#[derive(Debug, Clone)]
pub struct ProviderIntent {
    pub intent_id: String,
    pub client_secret: String,
}

/// Payment instrument details forwarded to the provider at confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaymentMethodDetails {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub status: ConfirmStatus,
    /// Provider reference for the charge attempt
    pub reference: String,
    pub failure_message: Option<String>,
}

/// External payment provider boundary. The production gateway lives behind
/// this trait; its internals are out of scope for this core.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        metadata: serde_json::Value,
    ) -> Result<ProviderIntent, ServiceError>;

    async fn confirm(
        &self,
        intent_id: &str,
        details: &PaymentMethodDetails,
    ) -> Result<ConfirmOutcome, ServiceError>;
}

/// Stand-in provider used when no gateway credentials are configured.
/// Issues demo intents and confirms every charge, so the rest of the flow
/// can be exercised end-to-end.
#[derive(Debug, Default, Clone)]
pub struct DemoPaymentProvider;

impl DemoPaymentProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentProvider for DemoPaymentProvider {
    async fn create_intent(
        &self,
        _amount: Decimal,
        _currency: &str,
        _metadata: serde_json::Value,
    ) -> Result<ProviderIntent, ServiceError> {
        let handle = Uuid::new_v4().simple().to_string();
        Ok(ProviderIntent {
            intent_id: format!("pi_demo_{}", handle),
            client_secret: format!("pi_demo_secret_{}", handle),
        })
    }

    async fn confirm(
        &self,
        intent_id: &str,
        _details: &PaymentMethodDetails,
    ) -> Result<ConfirmOutcome, ServiceError> {
        Ok(ConfirmOutcome {
            status: ConfirmStatus::Succeeded,
            reference: intent_id.to_string(),
            failure_message: None,
        })
    }
}
