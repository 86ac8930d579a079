use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use crate::{
    auth::{AuthUser, Role},
    errors::ServiceError,
    services::checkout::{CheckoutRequest, CheckoutResponse},
    ApiResponse, AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(checkout))
}

/// Create an order from the caller's current cart.
///
/// Runs the full saga: validate, price, charge, commit the order, then
/// best-effort stock decrement, cart clear and payment link.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = CheckoutResponse),
        (status = 400, description = "Empty or invalid cart", body = crate::errors::ErrorResponse),
        (status = 402, description = "Payment declined", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment collected but order creation failed; response carries the payment reference", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    if user.role != Role::Buyer {
        return Err(ServiceError::Forbidden(
            "Only buyers can check out".to_string(),
        ));
    }

    if payload.shipping_address.line1.trim().is_empty()
        || payload.shipping_address.city.trim().is_empty()
        || payload.shipping_address.state.trim().is_empty()
        || payload.shipping_address.postal_code.trim().is_empty()
        || payload.shipping_address.country.trim().is_empty()
    {
        return Err(ServiceError::ValidationError(
            "Shipping address is incomplete".to_string(),
        ));
    }

    let response = state.services.checkout.checkout(&user, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(response, "Order created successfully")),
    ))
}
