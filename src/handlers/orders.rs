use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, Role},
    entities::{order, order_status_history},
    errors::ServiceError,
    services::orders::{OrderDetails, OrderPaymentStatus, OrderStatus},
    ApiResponse, AppState, ListQuery, PaginatedResponse,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_my_orders))
        .route("/seller", get(list_seller_orders))
        .route("/:id", get(get_order))
        .route("/:id/history", get(get_order_history))
        .route("/:id/status", patch(update_order_status))
        .route("/:id/payment-status", patch(update_payment_status))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdatePaymentStatusRequest {
    pub payment_status: String,
    pub payment_intent_id: Option<String>,
}

/// Resolves an order identifier that may be a UUID or an order number.
async fn resolve_order_id(state: &AppState, id: &str) -> Result<Uuid, ServiceError> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }
    if let Some(details) = state.services.orders.find_by_order_number(id).await? {
        return Ok(details.order.id);
    }
    Err(ServiceError::NotFound(format!("Order {} not found", id)))
}

/// Resolves an order and enforces visibility: buyers see their own orders,
/// sellers see orders containing at least one of their items (with the item
/// list narrowed to theirs), admins see everything.
pub async fn load_visible_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> Result<OrderDetails, ServiceError> {
    let mut details = state
        .services
        .orders
        .get(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

    match user.role {
        Role::Admin => {}
        Role::Buyer => {
            if details.order.buyer_id != user.user_id {
                return Err(ServiceError::Forbidden("Access denied".to_string()));
            }
        }
        Role::Seller => {
            if !details.has_seller(user.user_id) {
                return Err(ServiceError::Forbidden("Access denied".to_string()));
            }
            details.items.retain(|i| i.seller_id == Some(user.user_id));
        }
    }

    Ok(details)
}

/// List the caller's own orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListQuery),
    responses(
        (status = 200, description = "Orders for the caller")
    ),
    tag = "Orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderDetails>>>, ServiceError> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<OrderStatus>())
        .transpose()?;
    let (orders, total) = state
        .services
        .orders
        .list_for_buyer(user.user_id, query.page, query.limit, status)
        .await?;

    Ok(Json(ApiResponse::ok(PaginatedResponse::new(
        orders, total, &query,
    ))))
}

/// List orders containing the calling seller's items
#[utoipa::path(
    get,
    path = "/api/v1/orders/seller",
    params(ListQuery),
    responses(
        (status = 200, description = "Orders containing the seller's items"),
        (status = 403, description = "Caller is not a seller", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn list_seller_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderDetails>>>, ServiceError> {
    if user.role != Role::Seller && user.role != Role::Admin {
        return Err(ServiceError::Forbidden("Access denied".to_string()));
    }

    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<OrderStatus>())
        .transpose()?;
    let (orders, total) = state
        .services
        .orders
        .list_for_seller(user.user_id, query.page, query.limit, status)
        .await?;

    Ok(Json(ApiResponse::ok(PaginatedResponse::new(
        orders, total, &query,
    ))))
}

/// Get a single order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    responses(
        (status = 200, description = "Order with items", body = OrderDetails),
        (status = 403, description = "Not visible to the caller", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<OrderDetails>>, ServiceError> {
    let order_id = resolve_order_id(&state, &id).await?;
    let details = load_visible_order(&state, &user, order_id).await?;
    Ok(Json(ApiResponse::ok(details)))
}

/// Get the append-only status history of an order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/history",
    responses(
        (status = 200, description = "Status history, oldest first")
    ),
    tag = "Orders"
)]
pub async fn get_order_history(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<order_status_history::Model>>>, ServiceError> {
    let order_id = resolve_order_id(&state, &id).await?;
    load_visible_order(&state, &user, order_id).await?;
    let history = state.services.orders.status_history(order_id).await?;
    Ok(Json(ApiResponse::ok(history)))
}

/// Update an order's status (sellers and admins)
#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/status",
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Unknown status value", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller may not update status", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    if user.role != Role::Seller && user.role != Role::Admin {
        return Err(ServiceError::Forbidden("Access denied".to_string()));
    }

    let status: OrderStatus = payload.status.parse()?;
    let order = state
        .services
        .orders
        .update_status(order_id, status, payload.notes)
        .await?;
    Ok(Json(ApiResponse::with_message(order, "Order status updated")))
}

/// Update an order's payment status (internal, called by the payment
/// service). A completed payment advances the order to processing.
#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/payment-status",
    request_body = UpdatePaymentStatusRequest,
    responses(
        (status = 200, description = "Payment status updated"),
        (status = 400, description = "Unknown payment status value", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentStatusRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let payment_status: OrderPaymentStatus = payload.payment_status.parse()?;
    let order = state
        .services
        .orders
        .update_payment_status(order_id, payment_status, payload.payment_intent_id)
        .await?;
    Ok(Json(ApiResponse::with_message(order, "Payment status updated")))
}
