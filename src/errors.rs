use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    /// Human-readable error description
    pub message: String,
    /// Per-item cart validation errors, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<CartLineError>>,
    /// Provider payment reference, present on post-payment inconsistencies
    /// so the charge can be reconciled out-of-band
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    pub timestamp: String,
}

/// One failed validation check for a single cart line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartLineError {
    pub product_id: Uuid,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stock: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_price: Option<Decimal>,
}

impl CartLineError {
    pub fn not_found(product_id: Uuid) -> Self {
        Self {
            product_id,
            error: "Product no longer available".to_string(),
            current_stock: None,
            new_price: None,
        }
    }

    pub fn inactive(product_id: Uuid) -> Self {
        Self {
            product_id,
            error: "Product is no longer active".to_string(),
            current_stock: None,
            new_price: None,
        }
    }

    pub fn insufficient_stock(product_id: Uuid, in_stock: i32, requested: i32) -> Self {
        Self {
            product_id,
            error: format!("Only {} items in stock, but cart has {}", in_stock, requested),
            current_stock: Some(in_stock),
            new_price: None,
        }
    }

    pub fn price_changed(product_id: Uuid, old_price: Decimal, new_price: Decimal) -> Self {
        Self {
            product_id,
            error: format!("Price changed from {} to {}", old_price, new_price),
            current_stock: None,
            new_price: Some(new_price),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Pre-checkout gate failure: stale price/stock in the cart. Carries the
    /// per-item report and leaves all stores untouched.
    #[error("Cart validation failed")]
    CartInvalid(Vec<CartLineError>),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// Payment collected but order creation failed. The provider reference
    /// must reach the caller for manual reconciliation; never refund
    /// automatically here.
    #[error("Payment succeeded but order creation failed (reference {payment_reference})")]
    PostPaymentInconsistency {
        payment_reference: String,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError,
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        ServiceError::CacheError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidOperation(_)
            | Self::CartInvalid(_)
            | Self::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PostPaymentInconsistency { .. } => StatusCode::CONFLICT,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Internal errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::CacheError(_) | Self::SerializationError(_) | Self::InternalServerError => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.response_message();

        let (errors, payment_reference) = match self {
            ServiceError::CartInvalid(items) => (Some(items), None),
            ServiceError::PostPaymentInconsistency {
                payment_reference, ..
            } => (None, Some(payment_reference)),
            _ => (None, None),
        };

        let body = ErrorResponse {
            success: false,
            message,
            errors,
            payment_reference,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
