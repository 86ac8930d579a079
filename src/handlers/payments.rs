use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, Role},
    entities::{payment_refund, payment_transaction},
    errors::ServiceError,
    services::payments::CreateRefundInput,
    ApiResponse, AppState, ListQuery, PaginatedResponse,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(payment_history))
        .route("/:id", get(get_payment))
        .route("/:id/refund", post(create_refund))
        .route("/webhook", post(super::payment_webhooks::payment_webhook))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRefundRequest {
    /// Amount to refund; defaults to the full payment amount
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
    /// Provider-side refund id when the refund was already executed at the
    /// gateway; generated otherwise
    pub provider_refund_id: Option<String>,
}

/// List the caller's payment history
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(ListQuery),
    responses(
        (status = 200, description = "Payments for the caller")
    ),
    tag = "Payments"
)]
pub async fn payment_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<payment_transaction::Model>>>, ServiceError> {
    let (payments, total) = state
        .services
        .payments
        .list_for_buyer(user.user_id, query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::ok(PaginatedResponse::new(
        payments, total, &query,
    ))))
}

/// Get a single payment transaction
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    responses(
        (status = 200, description = "Payment transaction", body = payment_transaction::Model),
        (status = 403, description = "Not visible to the caller", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown payment", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ApiResponse<payment_transaction::Model>>, ServiceError> {
    let payment = state
        .services
        .payments
        .find_by_id(payment_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

    if user.role == Role::Buyer && payment.buyer_id != user.user_id {
        return Err(ServiceError::Forbidden("Access denied".to_string()));
    }

    Ok(Json(ApiResponse::ok(payment)))
}

/// Record a refund against a succeeded payment (admins only)
#[utoipa::path(
    post,
    path = "/api/v1/payments/{id}/refund",
    request_body = CreateRefundRequest,
    responses(
        (status = 201, description = "Refund recorded", body = payment_refund::Model),
        (status = 400, description = "Payment is not refundable", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_refund(
    State(state): State<AppState>,
    user: AuthUser,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<CreateRefundRequest>,
) -> Result<(StatusCode, Json<ApiResponse<payment_refund::Model>>), ServiceError> {
    if user.role != Role::Admin {
        return Err(ServiceError::Forbidden("Access denied".to_string()));
    }

    let payment = state
        .services
        .payments
        .find_by_id(payment_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

    let amount = payload.amount.unwrap_or(payment.amount);
    let provider_refund_id = payload
        .provider_refund_id
        .unwrap_or_else(|| format!("re_{}", Uuid::new_v4().simple()));

    let refund = state
        .services
        .payments
        .create_refund(CreateRefundInput {
            payment_transaction_id: payment_id,
            amount,
            reason: payload.reason,
            provider_refund_id,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(refund, "Refund created")),
    ))
}
