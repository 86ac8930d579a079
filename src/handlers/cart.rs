use axum::{
    extract::{Path, State},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    cart::{CartValidation, CartView},
    errors::ServiceError,
    ApiResponse, AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route("/items/:product_id", patch(update_item).delete(remove_item))
        .route("/merge", post(merge_cart))
        .route("/validate", get(validate_cart))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MergeCartRequest {
    #[validate(length(min = 1, message = "Guest owner id is required"))]
    pub guest_owner: String,
}

/// Get the caller's cart, enriched with current catalog data
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Current cart", body = CartView)
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state.services.cart.get_cart(&user.cart_owner()).await?;
    Ok(Json(ApiResponse::ok(cart)))
}

/// Add a product to the cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Item added", body = CartView),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    payload.validate()?;

    let cart = state
        .services
        .cart
        .add_item(&user.cart_owner(), payload.product_id, payload.quantity)
        .await?;
    Ok(Json(ApiResponse::with_message(cart, "Item added to cart")))
}

/// Set the quantity of a cart line (0 removes it)
#[utoipa::path(
    patch,
    path = "/api/v1/cart/items/{product_id}",
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Cart updated", body = CartView),
        (status = 404, description = "Item not in cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state
        .services
        .cart
        .update_item(&user.cart_owner(), product_id, payload.quantity)
        .await?;
    Ok(Json(ApiResponse::with_message(cart, "Cart updated")))
}

/// Remove a product from the cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    responses(
        (status = 200, description = "Item removed", body = CartView)
    ),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state
        .services
        .cart
        .remove_item(&user.cart_owner(), product_id)
        .await?;
    Ok(Json(ApiResponse::with_message(cart, "Item removed from cart")))
}

/// Clear the whole cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart cleared")
    ),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<()>>, ServiceError> {
    state.services.cart.clear(&user.cart_owner()).await?;
    Ok(Json(ApiResponse::with_message((), "Cart cleared")))
}

/// Merge a guest cart into the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/merge",
    request_body = MergeCartRequest,
    responses(
        (status = 200, description = "Carts merged", body = CartView)
    ),
    tag = "Cart"
)]
pub async fn merge_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<MergeCartRequest>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    payload.validate()?;

    let cart = state
        .services
        .cart
        .merge(&payload.guest_owner, &user.cart_owner())
        .await?;
    Ok(Json(ApiResponse::with_message(cart, "Carts merged successfully")))
}

/// Validate the cart against current catalog state before checkout
#[utoipa::path(
    get,
    path = "/api/v1/cart/validate",
    responses(
        (status = 200, description = "Validation report", body = CartValidation)
    ),
    tag = "Cart"
)]
pub async fn validate_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CartValidation>>, ServiceError> {
    let validation = state.services.cart.validate(&user.cart_owner()).await?;
    Ok(Json(ApiResponse::ok(validation)))
}
