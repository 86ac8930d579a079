use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    entities::payment_transaction::PaymentStatus,
    errors::ServiceError,
    services::{
        orders::OrderPaymentStatus,
        payments::CreateRefundInput,
    },
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

/// Payment provider webhook. Signature-verified when a secret is configured,
/// and idempotent under redelivery: events are deduplicated by id and every
/// handler correlates through the provider intent id.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 403, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.clone() {
        let tolerance = state.config.payment_webhook_tolerance_secs.unwrap_or(300);
        if !verify_signature(&headers, &body, &secret, tolerance) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Forbidden(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let json: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid json: {}", e)))?;

    // Dedup redelivered events by provider event id.
    if let Some(event_id) = json.get("id").and_then(|v| v.as_str()) {
        let key = format!("wh:{}", event_id);
        if let Ok(mut conn) = state.redis.get_async_connection().await {
            let first_delivery: Result<bool, _> = redis::cmd("SET")
                .arg(&key)
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(24 * 3600)
                .query_async(&mut conn)
                .await;
            if let Ok(false) = first_delivery {
                info!("Webhook event {} already processed", event_id);
                return Ok((axum::http::StatusCode::OK, "ok"));
            }
        }
    }

    let event_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let intent_id = json
        .get("data")
        .and_then(|d| d.get("intent_id"))
        .and_then(|v| v.as_str());

    match (event_type, intent_id) {
        ("payment.succeeded", Some(intent_id)) => {
            handle_payment_succeeded(&state, intent_id).await;
        }
        ("payment.failed", Some(intent_id)) => {
            handle_payment_failed(&state, intent_id, &json).await;
        }
        ("payment.refunded", Some(intent_id)) => {
            handle_payment_refunded(&state, intent_id, &json).await;
        }
        _ => {
            info!("Unhandled payment webhook type: {}", event_type);
        }
    }

    Ok((axum::http::StatusCode::OK, "ok"))
}

async fn handle_payment_succeeded(state: &AppState, intent_id: &str) {
    let payment = match state
        .services
        .payments
        .find_by_provider_intent_id(intent_id)
        .await
    {
        Ok(Some(p)) => p,
        Ok(None) => {
            warn!(intent_id, "Payment not found for intent");
            return;
        }
        Err(e) => {
            warn!(intent_id, error = %e, "Payment lookup failed");
            return;
        }
    };

    if let Err(e) = state
        .services
        .payments
        .update_status(payment.id, PaymentStatus::Succeeded, None)
        .await
    {
        warn!(payment_id = %payment.id, error = %e, "Failed to mark payment succeeded");
        return;
    }

    if let Some(order_id) = payment.order_id {
        if let Err(e) = state
            .services
            .orders
            .update_payment_status(
                order_id,
                OrderPaymentStatus::Completed,
                Some(intent_id.to_string()),
            )
            .await
        {
            warn!(order_id = %order_id, error = %e, "Failed to propagate payment status to order");
        }
    }

    info!(payment_id = %payment.id, intent_id, "Payment succeeded via webhook");
}

async fn handle_payment_failed(state: &AppState, intent_id: &str, json: &Value) {
    let payment = match state
        .services
        .payments
        .find_by_provider_intent_id(intent_id)
        .await
    {
        Ok(Some(p)) => p,
        _ => {
            warn!(intent_id, "Payment not found for intent");
            return;
        }
    };

    let failure_message = json
        .get("data")
        .and_then(|d| d.get("failure_message"))
        .cloned();

    if let Err(e) = state
        .services
        .payments
        .update_status(
            payment.id,
            PaymentStatus::Failed,
            failure_message.map(|m| serde_json::json!({ "failure_message": m })),
        )
        .await
    {
        warn!(payment_id = %payment.id, error = %e, "Failed to mark payment failed");
    }
}

async fn handle_payment_refunded(state: &AppState, intent_id: &str, json: &Value) {
    let payment = match state
        .services
        .payments
        .find_by_provider_intent_id(intent_id)
        .await
    {
        Ok(Some(p)) => p,
        _ => {
            warn!(intent_id, "Payment not found for intent");
            return;
        }
    };

    let data = json.get("data");
    let amount = data
        .and_then(|d| d.get("amount"))
        .and_then(|v| match v {
            Value::String(s) => s.parse::<Decimal>().ok(),
            Value::Number(n) => n.as_f64().and_then(Decimal::from_f64_retain),
            _ => None,
        })
        .unwrap_or(payment.amount);
    let reason = data
        .and_then(|d| d.get("reason"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let provider_refund_id = data
        .and_then(|d| d.get("refund_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("re_{}", Uuid::new_v4().simple()));

    match state
        .services
        .payments
        .create_refund(CreateRefundInput {
            payment_transaction_id: payment.id,
            amount,
            reason,
            provider_refund_id,
        })
        .await
    {
        Ok(refund) => {
            info!(payment_id = %payment.id, refund_id = %refund.id, amount = %amount, "Refund processed via webhook");
        }
        Err(e) => {
            warn!(payment_id = %payment.id, error = %e, "Failed to record webhook refund");
        }
    }
}

fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    // Generic HMAC over "{timestamp}.{body}" with x-timestamp and
    // x-signature headers.
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            if let Ok(ts_i) = ts.parse::<i64>() {
                let now = chrono::Utc::now().timestamp();
                if (now - ts_i).unsigned_abs() > tolerance_secs {
                    return false;
                }
            }
            let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
            let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
                Ok(mac) => mac,
                Err(_) => return false,
            };
            mac.update(signed.as_bytes());
            let expected = hex::encode(mac.finalize().into_bytes());
            return constant_time_eq(&expected, sig);
        }
    }
    false
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
